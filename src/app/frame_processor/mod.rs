// SPDX-License-Identifier: GPL-3.0-only

//! Frame analysis
//!
//! A [`Detector`] turns one frame into barcode candidates. The
//! [`DetectionProcessor`] runs a detector on the processing thread and feeds
//! every result into the [`WorkflowModel`]. Detector failures only cost the
//! frame they happened on.

pub mod tasks;
pub mod types;

pub use tasks::QrDetector;
pub use types::{
    BarcodeValue, BoundingBox, Candidate, DetectionResult, DetectorMetadata, WifiSecurity,
};

use crate::app::workflow::WorkflowModel;
use crate::backends::camera::frame_loop::FrameProcessor;
use crate::backends::camera::types::{CameraFrame, LensFacing};
use crate::errors::DetectionError;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Barcode detection capability
///
/// Called from the processing thread only, one frame at a time.
pub trait Detector: Send {
    /// Find every barcode in `frame`
    ///
    /// Bounding boxes are in the pixel space of the frame as captured.
    fn detect(
        &mut self,
        frame: &CameraFrame,
        metadata: &DetectorMetadata,
    ) -> Result<Vec<Candidate>, DetectionError>;

    /// Release detector resources. No further calls follow.
    fn close(&mut self) {}
}

/// Runs a [`Detector`] on every frame and drives the workflow with the results
pub struct DetectionProcessor {
    detector: Box<dyn Detector>,
    workflow: WorkflowModel,
    facing: LensFacing,
    failures: u64,
}

impl DetectionProcessor {
    pub fn new(detector: Box<dyn Detector>, workflow: WorkflowModel, facing: LensFacing) -> Self {
        Self {
            detector,
            workflow,
            facing,
            failures: 0,
        }
    }

    /// Frames whose detection failed
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl FrameProcessor for DetectionProcessor {
    fn process(&mut self, frame: &CameraFrame) {
        let metadata = DetectorMetadata {
            width: frame.width,
            height: frame.height,
            rotation: frame.rotation,
            facing: self.facing,
        };

        let start = Instant::now();
        let candidates = match self.detector.detect(frame, &metadata) {
            Ok(candidates) => candidates,
            Err(e) => {
                self.failures += 1;
                warn!(sequence = frame.sequence, error = %e, "Barcode detection failed");
                return;
            }
        };
        trace!(
            sequence = frame.sequence,
            candidates = candidates.len(),
            detect_ms = start.elapsed().as_millis() as u64,
            "Frame analysed"
        );

        let result = DetectionResult {
            candidates,
            frame_size: frame.resolution(),
            rotation: frame.rotation,
            captured_at: frame.captured_at,
        };
        self.workflow.on_detection(&result);
    }

    fn on_idle(&mut self) {
        self.workflow.tick(Instant::now());
    }

    fn stop(&mut self) {
        debug!(failures = self.failures, "Closing detector");
        self.detector.close();
    }
}
