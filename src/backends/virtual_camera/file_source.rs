// SPDX-License-Identifier: GPL-3.0-only

//! Image sources for the virtual camera
//!
//! Loads still images with the `image` crate and renders them into raw frame
//! bytes in the pixel format the virtual camera streams.

use crate::backends::camera::types::{PixelFormat, Resolution};
use crate::errors::{AppError, AppResult};
use image::DynamicImage;
use image::imageops::FilterType;
use std::path::Path;
use tracing::info;

/// Neutral chroma for the semi-planar formats
const NEUTRAL_CHROMA: u8 = 128;

/// Load an image file from disk
pub fn load_image(path: &Path) -> AppResult<DynamicImage> {
    info!(path = %path.display(), "Loading image file");

    let img = image::open(path).map_err(|e| {
        AppError::Image(format!("Failed to load image '{}': {}", path.display(), e))
    })?;

    info!(width = img.width(), height = img.height(), "Image loaded successfully");
    Ok(img)
}

/// Render `img` as a tightly packed frame of `size` in `format`
///
/// The image is scaled when its size differs from `size`.
pub fn render_frame(img: &DynamicImage, size: Resolution, format: PixelFormat) -> Vec<u8> {
    let scaled;
    let img = if img.width() != size.width || img.height() != size.height {
        scaled = img.resize_exact(size.width, size.height, FilterType::Triangle);
        &scaled
    } else {
        img
    };

    match format {
        PixelFormat::Rgba => img.to_rgba8().into_raw(),
        PixelFormat::Gray8 => img.to_luma8().into_raw(),
        PixelFormat::Nv21 | PixelFormat::Nv12 => {
            let mut data = img.to_luma8().into_raw();
            data.resize(format.buffer_len(size.width, size.height), NEUTRAL_CHROMA);
            data
        }
    }
}

/// Diagonal gradient test pattern; `phase` shifts the pattern between frames
pub fn synthetic_frame(size: Resolution, format: PixelFormat, phase: u32) -> Vec<u8> {
    let luma = |x: u32, y: u32| ((x + y + phase * 8) % 256) as u8;
    let mut data = Vec::with_capacity(format.buffer_len(size.width, size.height));

    match format {
        PixelFormat::Rgba => {
            for y in 0..size.height {
                for x in 0..size.width {
                    let v = luma(x, y);
                    data.extend_from_slice(&[v, v, v, 255]);
                }
            }
        }
        PixelFormat::Gray8 | PixelFormat::Nv21 | PixelFormat::Nv12 => {
            for y in 0..size.height {
                data.extend((0..size.width).map(|x| luma(x, y)));
            }
            data.resize(format.buffer_len(size.width, size.height), NEUTRAL_CHROMA);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_render_scales_to_stream_size() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([200])));
        let size = Resolution::new(4, 2);

        let gray = render_frame(&img, size, PixelFormat::Gray8);
        assert_eq!(gray.len(), 8);
        assert!(gray.iter().all(|&v| v == 200));

        let nv21 = render_frame(&img, size, PixelFormat::Nv21);
        assert_eq!(nv21.len(), PixelFormat::Nv21.buffer_len(4, 2));
        assert_eq!(nv21[8..], [NEUTRAL_CHROMA; 4]);

        assert_eq!(render_frame(&img, size, PixelFormat::Rgba).len(), 32);
    }

    #[test]
    fn test_synthetic_frames_differ_by_phase() {
        let size = Resolution::new(8, 8);
        let a = synthetic_frame(size, PixelFormat::Gray8, 0);
        let b = synthetic_frame(size, PixelFormat::Gray8, 1);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_load_missing_file_is_image_error() {
        let err = load_image(Path::new("/nonexistent/frame.png")).unwrap_err();
        assert!(matches!(err, AppError::Image(_)));
    }
}
