// SPDX-License-Identifier: GPL-3.0-only

//! Barcode scanner - live camera barcode scanning pipeline
//!
//! This library captures frames from a camera device, hands them to a barcode
//! detector without ever blocking capture, and drives the scanning workflow
//! (reticle, confirm, search, result) from the detection results.
//!
//! # Architecture
//!
//! - [`backends`]: capture devices, frame channel, buffer pool and the
//!   processing loop
//! - [`app`]: size negotiation, detectors and the workflow state machine
//! - [`config`]: user preferences
//!
//! # Example
//!
//! ```ignore
//! let workflow = WorkflowModel::new(WorkflowStateMachine::new(&config.scan));
//! let mut source = CaptureSource::new(Box::new(device), DisplayConstraints::default());
//! source.set_frame_processor(Box::new(DetectionProcessor::new(
//!     Box::new(QrDetector::new()),
//!     workflow.clone(),
//!     LensFacing::Back,
//! )))?;
//! source.start()?;
//! ```

pub mod app;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types
pub use app::format_picker::{DisplayConstraints, SizeNegotiator};
pub use app::frame_processor::{Candidate, DetectionProcessor, Detector, QrDetector};
pub use app::workflow::{WorkflowEvent, WorkflowModel, WorkflowState, WorkflowStateMachine};
pub use backends::camera::{CaptureDevice, CaptureSource, CaptureState};
pub use backends::virtual_camera::VirtualCamera;
pub use config::Config;
pub use errors::{AppError, AppResult, CaptureError, DetectionError};
