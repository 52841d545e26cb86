// SPDX-License-Identifier: GPL-3.0-only

//! Virtual capture device
//!
//! Streams still images (or a synthetic test pattern) at a fixed frame rate
//! from its own producer thread, exactly like a hardware device callback
//! would. Used by the CLI and by pipeline tests.
//!
//! # Architecture
//!
//! ```text
//! Image files / test pattern
//!        │  render_frame (at open)
//!        ▼
//! ┌──────────────────┐
//! │ Producer thread  │  ← paced at the stream fps
//! └──────────────────┘
//!        │  FrameSink::submit
//!        ▼
//!   CaptureSource pipeline
//! ```

mod file_source;

pub use file_source::{load_image, render_frame, synthetic_frame};

use crate::app::format_picker::generate_size_candidates;
use crate::backends::camera::types::{
    CameraDevice, LensFacing, PixelFormat, Resolution, SensorRotation, SizeCandidate, StreamConfig,
};
use crate::backends::camera::{CaptureDevice, DeviceLock, FrameSink};
use crate::errors::{AppError, AppResult, CaptureError, CaptureResult};
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Preview sizes the synthetic pattern advertises
const SYNTHETIC_PREVIEW_SIZES: [Resolution; 4] = [
    Resolution::new(320, 240),
    Resolution::new(640, 480),
    Resolution::new(1280, 720),
    Resolution::new(1920, 1080),
];

const SYNTHETIC_PICTURE_SIZES: [Resolution; 2] =
    [Resolution::new(4032, 3024), Resolution::new(3840, 2160)];

/// Number of distinct synthetic frames cycled through
const SYNTHETIC_FRAME_COUNT: u32 = 8;

struct Producer {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Capture device backed by images instead of a sensor
pub struct VirtualCamera {
    info: CameraDevice,
    images: Vec<DynamicImage>,
    format: PixelFormat,
    frame_limit: Option<u64>,
    lock: Arc<DeviceLock>,
    /// Frames rendered for the open stream
    frames: Arc<Vec<Vec<u8>>>,
    config: Option<StreamConfig>,
    producer: Option<Producer>,
    emitted: Arc<AtomicU64>,
}

impl VirtualCamera {
    /// Camera producing a moving gradient in NV21
    pub fn synthetic() -> Self {
        Self::with_images("Virtual camera (test pattern)", Vec::new(), PixelFormat::Nv21)
    }

    /// Camera replaying the given image files in order, in grayscale
    pub fn from_files(paths: &[PathBuf]) -> AppResult<Self> {
        if paths.is_empty() {
            return Err(AppError::Other("No image files given".into()));
        }
        let images = paths
            .iter()
            .map(|p| load_image(p.as_path()))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self::from_images(images))
    }

    /// Camera replaying already decoded images
    pub fn from_images(images: Vec<DynamicImage>) -> Self {
        Self::with_images("Virtual camera (images)", images, PixelFormat::Gray8)
    }

    fn with_images(name: &str, images: Vec<DynamicImage>, format: PixelFormat) -> Self {
        Self {
            info: CameraDevice {
                id: "virtual0".into(),
                name: name.into(),
                facing: LensFacing::External,
                sensor_orientation: SensorRotation::None,
            },
            images,
            format,
            frame_limit: None,
            lock: DeviceLock::new(),
            frames: Arc::new(Vec::new()),
            config: None,
            producer: None,
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stream in `format` instead of the default
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_facing(mut self, facing: LensFacing) -> Self {
        self.info.facing = facing;
        self
    }

    pub fn with_sensor_orientation(mut self, orientation: SensorRotation) -> Self {
        self.info.sensor_orientation = orientation;
        self
    }

    /// Stop producing after `limit` frames
    pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
        self.frame_limit = limit;
        self
    }

    /// Share a device lock, for several sources contending over one device
    pub fn with_lock(mut self, lock: Arc<DeviceLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Counter of frames handed to the sink so far
    pub fn emitted_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.emitted)
    }
}

impl CaptureDevice for VirtualCamera {
    fn describe(&self) -> CameraDevice {
        self.info.clone()
    }

    fn supported_sizes(&self) -> Vec<SizeCandidate> {
        if self.images.is_empty() {
            return generate_size_candidates(&SYNTHETIC_PREVIEW_SIZES, &SYNTHETIC_PICTURE_SIZES);
        }

        let mut sizes: Vec<SizeCandidate> = Vec::new();
        for img in &self.images {
            let candidate = SizeCandidate::preview_only(Resolution::new(img.width(), img.height()));
            if !sizes.contains(&candidate) {
                sizes.push(candidate);
            }
        }
        sizes
    }

    fn preferred_format(&self) -> PixelFormat {
        self.format
    }

    fn lock(&self) -> Arc<DeviceLock> {
        Arc::clone(&self.lock)
    }

    fn open(&mut self, config: &StreamConfig) -> CaptureResult<()> {
        let size = config.size.preview;
        if size.width == 0 || size.height == 0 {
            return Err(CaptureError::Setup(format!("invalid stream size {}", size)));
        }

        let frames: Vec<Vec<u8>> = if self.images.is_empty() {
            (0..SYNTHETIC_FRAME_COUNT)
                .map(|phase| synthetic_frame(size, config.format, phase))
                .collect()
        } else {
            self.images
                .iter()
                .map(|img| render_frame(img, size, config.format))
                .collect()
        };

        info!(stream = %config, frames = frames.len(), "Virtual camera opened");
        self.frames = Arc::new(frames);
        self.config = Some(*config);
        Ok(())
    }

    fn start_stream(&mut self, sink: FrameSink) -> CaptureResult<()> {
        let config = self
            .config
            .ok_or_else(|| CaptureError::Setup("virtual camera not opened".into()))?;
        if self.producer.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let frames = Arc::clone(&self.frames);
        let emitted = Arc::clone(&self.emitted);
        let limit = self.frame_limit;
        let size = config.size.preview;
        let interval = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);

        let handle = thread::Builder::new()
            .name("virtual-camera".into())
            .spawn(move || {
                debug!(?interval, "Virtual camera producer started");
                let mut next = Instant::now();
                let mut count: u64 = 0;

                while !thread_stop.load(Ordering::Acquire) {
                    if limit.is_some_and(|l| count >= l) {
                        debug!(count, "Virtual camera frame limit reached");
                        break;
                    }

                    let data = &frames[(count % frames.len() as u64) as usize];
                    sink.submit(data, size.width, size.height, None);
                    count += 1;
                    emitted.store(count, Ordering::Release);

                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                debug!(count, "Virtual camera producer exiting");
            })
            .map_err(|e| CaptureError::Setup(format!("failed to spawn producer: {}", e)))?;

        self.producer = Some(Producer { handle, stop });
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.stop.store(true, Ordering::Release);
            if producer.handle.join().is_err() {
                warn!("Virtual camera producer panicked");
            }
        }
    }

    fn close(&mut self) {
        self.frames = Arc::new(Vec::new());
        self.config = None;
    }
}

impl Drop for VirtualCamera {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
