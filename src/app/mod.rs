// SPDX-License-Identifier: GPL-3.0-only

//! Scanner application logic
//!
//! - `format_picker`: preview size negotiation
//! - `frame_processor`: detector capability and the processor that runs it
//! - `workflow`: the detection workflow state machine and its observers

pub mod format_picker;
pub mod frame_processor;
pub mod workflow;

pub use frame_processor::{DetectionProcessor, Detector};
pub use workflow::{WorkflowModel, WorkflowState, WorkflowStateMachine};
