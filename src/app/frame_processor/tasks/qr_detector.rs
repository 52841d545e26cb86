// SPDX-License-Identifier: GPL-3.0-only

//! QR code detection task
//!
//! This module implements QR code detection using the rqrr crate.
//! It extracts the luminance plane of a frame, downscales it when the frame
//! is larger than the configured maximum, and decodes every QR grid found.
//! Bounding boxes are reported in the pixel space of the original frame.

use crate::app::frame_processor::Detector;
use crate::app::frame_processor::types::{BoundingBox, Candidate, DetectorMetadata};
use crate::backends::camera::types::{CameraFrame, PixelFormat};
use crate::constants::DETECTOR_MAX_DIMENSION;
use crate::errors::DetectionError;
use image::DynamicImage;
use std::time::Instant;
use tracing::{debug, trace};

/// QR code detector
///
/// Optimized for real-time processing with frame downscaling.
pub struct QrDetector {
    /// Maximum dimension for processing (frames are downscaled to this)
    max_dimension: u32,
}

impl Default for QrDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl QrDetector {
    pub fn new() -> Self {
        Self::with_max_dimension(DETECTOR_MAX_DIMENSION)
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    /// Detect QR codes in a decoded image
    pub fn detect_image(&self, img: &DynamicImage) -> Vec<Candidate> {
        let gray = img.to_luma8();
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let plane = LumaPlane::sample(width, height, self.max_dimension, |x, y| {
            gray.get_pixel(x, y).0[0]
        });
        decode_plane(&plane)
    }
}

impl Detector for QrDetector {
    fn detect(
        &mut self,
        frame: &CameraFrame,
        _metadata: &DetectorMetadata,
    ) -> Result<Vec<Candidate>, DetectionError> {
        let plane = extract_luma(frame, self.max_dimension)?;
        Ok(decode_plane(&plane))
    }
}

/// Greyscale image at processing resolution
struct LumaPlane {
    width: u32,
    height: u32,
    data: Vec<u8>,
    /// Source pixels per processed pixel
    scale: f32,
}

impl LumaPlane {
    /// Nearest-neighbour sample a `width`x`height` source so that neither
    /// side exceeds `max_dimension`
    fn sample(
        width: u32,
        height: u32,
        max_dimension: u32,
        luma: impl Fn(u32, u32) -> u8,
    ) -> Self {
        let scale = (width as f32 / max_dimension as f32)
            .max(height as f32 / max_dimension as f32)
            .max(1.0);
        let out_width = ((width as f32 / scale) as u32).max(1);
        let out_height = ((height as f32 / scale) as u32).max(1);

        let mut data = Vec::with_capacity(out_width as usize * out_height as usize);
        for y in 0..out_height {
            let sy = (((y as f32 + 0.5) * scale) as u32).min(height - 1);
            for x in 0..out_width {
                let sx = (((x as f32 + 0.5) * scale) as u32).min(width - 1);
                data.push(luma(sx, sy));
            }
        }

        Self {
            width: out_width,
            height: out_height,
            data,
            scale,
        }
    }
}

/// Luminance of the first plane, or computed from RGBA
fn extract_luma(frame: &CameraFrame, max_dimension: u32) -> Result<LumaPlane, DetectionError> {
    let (width, height) = (frame.width, frame.height);
    if width == 0 || height == 0 {
        return Err(DetectionError::new("empty frame"));
    }

    let bpp = frame.format.primary_bytes_per_pixel() as usize;
    let stride = frame.stride as usize;
    let data = frame.data();
    let needed = stride * (height as usize - 1) + width as usize * bpp;
    if stride < width as usize * bpp || data.len() < needed {
        return Err(DetectionError::new(format!(
            "{} frame {}x{} (stride {}) needs {} bytes, got {}",
            frame.format,
            width,
            height,
            stride,
            needed,
            data.len()
        )));
    }

    let start = Instant::now();
    let plane = match frame.format {
        PixelFormat::Nv21 | PixelFormat::Nv12 | PixelFormat::Gray8 => {
            LumaPlane::sample(width, height, max_dimension, |x, y| {
                data[y as usize * stride + x as usize]
            })
        }
        PixelFormat::Rgba => LumaPlane::sample(width, height, max_dimension, |x, y| {
            let i = y as usize * stride + x as usize * 4;
            let (r, g, b) = (data[i] as u32, data[i + 1] as u32, data[i + 2] as u32);
            ((r * 299 + g * 587 + b * 114) / 1000) as u8
        }),
    };

    trace!(
        proc_width = plane.width,
        proc_height = plane.height,
        scale = plane.scale,
        conversion_us = start.elapsed().as_micros() as u64,
        "Prepared luma plane for QR detection"
    );
    Ok(plane)
}

fn decode_plane(plane: &LumaPlane) -> Vec<Candidate> {
    let start = Instant::now();
    let width = plane.width as usize;
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        width,
        plane.height as usize,
        |x, y| plane.data[y * width + x],
    );
    let grids = prepared.detect_grids();

    let mut candidates = Vec::with_capacity(grids.len());
    for grid in grids {
        let content = match grid.decode() {
            Ok((_meta, content)) => content,
            Err(e) => {
                debug!(error = ?e, "Failed to decode QR grid");
                continue;
            }
        };

        let Some(bounds) = BoundingBox::enclosing(
            grid.bounds
                .iter()
                .map(|p| (p.x as f32 * plane.scale, p.y as f32 * plane.scale)),
        ) else {
            continue;
        };

        debug!(
            content = %content,
            left = bounds.left,
            top = bounds.top,
            width = bounds.width(),
            height = bounds.height(),
            "Detected QR code"
        );
        candidates.push(Candidate::new(bounds, content));
    }

    if !candidates.is_empty() {
        debug!(
            count = candidates.len(),
            total_ms = start.elapsed().as_millis() as u64,
            "QR detection found codes"
        );
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::buffer_pool::BufferPool;
    use crate::backends::camera::types::{LensFacing, SensorRotation};

    const QR_ABC123: &[u8] = include_bytes!("../../../../tests/fixtures/qr_abc123.png");

    fn metadata(frame: &CameraFrame) -> DetectorMetadata {
        DetectorMetadata {
            width: frame.width,
            height: frame.height,
            rotation: frame.rotation,
            facing: LensFacing::Back,
        }
    }

    fn frame_from(data: &[u8], width: u32, height: u32, format: PixelFormat) -> CameraFrame {
        let pool = BufferPool::new(1);
        let mut buffer = pool.acquire(data.len()).unwrap();
        buffer.fill_from(data);
        CameraFrame::new(buffer, width, height, format, SensorRotation::None, 0)
    }

    #[test]
    fn test_detects_qr_in_gray_frame() {
        let img = image::load_from_memory(QR_ABC123).unwrap();
        let gray = img.to_luma8();
        let (w, h) = gray.dimensions();
        let frame = frame_from(gray.as_raw(), w, h, PixelFormat::Gray8);

        let mut detector = QrDetector::new();
        let candidates = detector.detect(&frame, &metadata(&frame)).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].raw, "ABC123");

        // Symbol spans 168px starting at 32px
        let b = candidates[0].bounds;
        assert!(b.left >= 24.0 && b.left <= 40.0, "left {}", b.left);
        assert!(b.right >= 192.0 && b.right <= 208.0, "right {}", b.right);
    }

    #[test]
    fn test_detects_qr_in_rgba_frame_with_downscale() {
        let img = image::load_from_memory(QR_ABC123).unwrap();
        let rgba = img.to_rgba8();
        let (w, h) = rgba.dimensions();
        let frame = frame_from(rgba.as_raw(), w, h, PixelFormat::Rgba);

        // Forces a 2x downscale; boxes come back in frame space
        let mut detector = QrDetector::with_max_dimension(116);
        let candidates = detector.detect(&frame, &metadata(&frame)).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].raw, "ABC123");
        assert!(candidates[0].bounds.right > 150.0);
    }

    #[test]
    fn test_blank_frame_has_no_candidates() {
        let data = vec![255u8; PixelFormat::Nv21.buffer_len(64, 48)];
        let frame = frame_from(&data, 64, 48, PixelFormat::Nv21);
        let mut detector = QrDetector::new();
        assert!(detector.detect(&frame, &metadata(&frame)).unwrap().is_empty());
    }

    #[test]
    fn test_empty_image_has_no_candidates() {
        let detector = QrDetector::new();
        for (width, height) in [(0, 0), (0, 10), (10, 0)] {
            let img = DynamicImage::ImageLuma8(image::GrayImage::new(width, height));
            assert!(detector.detect_image(&img).is_empty());
        }
    }

    #[test]
    fn test_short_buffer_is_error() {
        let frame = frame_from(&[0u8; 10], 64, 48, PixelFormat::Gray8);
        let mut detector = QrDetector::new();
        assert!(detector.detect(&frame, &metadata(&frame)).is_err());
    }

    #[test]
    fn test_sample_downscales_to_max_dimension() {
        let plane = LumaPlane::sample(1280, 720, 640, |x, _| (x % 256) as u8);
        assert_eq!((plane.width, plane.height), (640, 360));
        assert_eq!(plane.scale, 2.0);
        assert_eq!(plane.data.len(), 640 * 360);
    }
}
