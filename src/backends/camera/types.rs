// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use super::buffer_pool::FrameBuffer;
use crate::constants::ASPECT_RATIO_TOLERANCE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;

/// Rotation in degrees (clockwise)
///
/// Used both for the physical mounting of a sensor and for the rotation that
/// has to be applied to a captured frame to make it upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, SensorRotation::Rotate90 | SensorRotation::Rotate270)
    }

    /// Rotation a frame from a sensor mounted at `self` needs when the
    /// display is rotated by `display`.
    ///
    /// Front lenses are mirrored, so the display rotation is added instead
    /// of subtracted.
    pub fn relative_to_display(&self, display: SensorRotation, facing: LensFacing) -> Self {
        let sensor = self.degrees() as i32;
        let display = display.degrees() as i32;
        match facing {
            LensFacing::Front => Self::from_degrees_int(sensor + display),
            LensFacing::Back | LensFacing::External => Self::from_degrees_int(sensor - display),
        }
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Direction a camera lens faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LensFacing {
    #[default]
    Back,
    Front,
    External,
}

impl std::fmt::Display for LensFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensFacing::Back => write!(f, "back"),
            LensFacing::Front => write!(f, "front"),
            LensFacing::External => write!(f, "external"),
        }
    }
}

/// Pixel format for camera frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// Semi-planar 4:2:0, Y plane followed by interleaved VU
    #[default]
    Nv21,
    /// Semi-planar 4:2:0, Y plane followed by interleaved UV
    Nv12,
    /// 8-bit grayscale (single channel)
    Gray8,
    /// 32-bit RGBA
    Rgba,
}

impl PixelFormat {
    /// Bytes per pixel of the first plane (the one `stride` describes)
    pub fn primary_bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Nv21 | Self::Nv12 | Self::Gray8 => 1,
            Self::Rgba => 4,
        }
    }

    /// Total buffer size for a tightly packed frame of the given size
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            // Chroma plane is a quarter of the pixels times two samples
            Self::Nv21 | Self::Nv12 => pixels + 2 * (width as usize).div_ceil(2) * (height as usize).div_ceil(2),
            Self::Gray8 => pixels,
            Self::Rgba => pixels * 4,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Nv21 => "NV21",
            Self::Nv12 => "NV12",
            Self::Gray8 => "GRAY8",
            Self::Rgba => "RGBA",
        };
        write!(f, "{}", name)
    }
}

/// A width/height pair in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height (0.0 for a degenerate size)
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }

    /// Whether both sizes fall in the same aspect ratio class
    pub fn same_aspect_ratio(&self, other: &Resolution) -> bool {
        (self.aspect_ratio() - other.aspect_ratio()).abs() <= ASPECT_RATIO_TOLERANCE
    }

    pub fn swapped(&self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Error returned when a size string is not `WIDTHxHEIGHT`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid size string: {0:?}")]
pub struct ParseResolutionError(pub String);

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    /// Accepts `1280x720` and `1280*720`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (w, h) = trimmed
            .split_once(['x', 'X', '*'])
            .ok_or_else(|| ParseResolutionError(s.to_string()))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| ParseResolutionError(s.to_string()))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| ParseResolutionError(s.to_string()))?;
        Ok(Self { width, height })
    }
}

/// A preview size with an optional still-picture size of matching ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SizeCandidate {
    pub preview: Resolution,
    pub picture: Option<Resolution>,
}

impl SizeCandidate {
    pub fn new(preview: Resolution, picture: Option<Resolution>) -> Self {
        Self { preview, picture }
    }

    pub fn preview_only(preview: Resolution) -> Self {
        Self {
            preview,
            picture: None,
        }
    }
}

impl From<Resolution> for SizeCandidate {
    fn from(preview: Resolution) -> Self {
        Self::preview_only(preview)
    }
}

/// Represents a camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Backend specific identifier
    pub id: String,
    /// Human readable name
    pub name: String,
    pub facing: LensFacing,
    /// Physical mounting of the sensor relative to the device's natural orientation
    pub sensor_orientation: SensorRotation,
}

/// Stream configuration negotiated by the capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub size: SizeCandidate,
    pub format: PixelFormat,
    pub fps: u32,
    /// Rotation stamped on every frame of the stream
    pub rotation: SensorRotation,
}

impl std::fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} @ {}fps ({})",
            self.size.preview, self.format, self.fps, self.rotation
        )
    }
}

/// A single frame from the camera
///
/// Owns its pooled buffer exclusively. Dropping the frame returns the buffer
/// to the pool it came from.
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Row stride of the first plane in bytes
    pub stride: u32,
    pub format: PixelFormat,
    /// Clockwise rotation needed to display the frame upright
    pub rotation: SensorRotation,
    /// Timestamp when frame was captured
    pub captured_at: Instant,
    /// Monotonic sequence number assigned by the producer
    pub sequence: u64,
    buffer: FrameBuffer,
}

impl CameraFrame {
    pub fn new(
        buffer: FrameBuffer,
        width: u32,
        height: u32,
        format: PixelFormat,
        rotation: SensorRotation,
        sequence: u64,
    ) -> Self {
        Self {
            width,
            height,
            stride: width * format.primary_bytes_per_pixel(),
            format,
            rotation,
            captured_at: Instant::now(),
            sequence,
            buffer,
        }
    }

    /// Override the row stride (for padded buffers)
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Frame size as captured (before rotation)
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

impl std::fmt::Debug for CameraFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("rotation", &self.rotation)
            .field("sequence", &self.sequence)
            .field("buffer", &self.buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_relative_to_display() {
        let sensor = SensorRotation::Rotate90;
        assert_eq!(
            sensor.relative_to_display(SensorRotation::None, LensFacing::Back),
            SensorRotation::Rotate90
        );
        assert_eq!(
            sensor.relative_to_display(SensorRotation::Rotate90, LensFacing::Back),
            SensorRotation::None
        );
        assert_eq!(
            sensor.relative_to_display(SensorRotation::Rotate270, LensFacing::Back),
            SensorRotation::Rotate180
        );
        assert_eq!(
            SensorRotation::Rotate270.relative_to_display(SensorRotation::Rotate90, LensFacing::Front),
            SensorRotation::None
        );
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("1280x720".parse::<Resolution>(), Ok(Resolution::new(1280, 720)));
        assert_eq!(" 640*480 ".parse::<Resolution>(), Ok(Resolution::new(640, 480)));
        assert!("1280".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_same_aspect_ratio_uses_tolerance() {
        let hd = Resolution::new(1280, 720);
        assert!(hd.same_aspect_ratio(&Resolution::new(1920, 1080)));
        // 854x480 is 1.7791..., within 0.01 of 16:9
        assert!(hd.same_aspect_ratio(&Resolution::new(854, 480)));
        assert!(!hd.same_aspect_ratio(&Resolution::new(640, 480)));
    }

    #[test]
    fn test_nv21_buffer_len() {
        assert_eq!(PixelFormat::Nv21.buffer_len(4, 2), 8 + 4);
        assert_eq!(PixelFormat::Rgba.buffer_len(4, 2), 32);
        assert_eq!(PixelFormat::Gray8.buffer_len(3, 3), 9);
    }
}
