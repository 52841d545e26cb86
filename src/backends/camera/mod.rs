// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture pipeline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ CaptureDevice       │  ← hardware / virtual backend, own thread
//! └──────────┬──────────┘
//!            │ FrameSink::submit (pooled buffer)
//!            ▼
//! ┌─────────────────────┐
//! │ FrameChannel        │  ← single slot, latest wins
//! └──────────┬──────────┘
//!            │ take_next
//!            ▼
//! ┌─────────────────────┐
//! │ FrameLoopController │  ← processing thread
//! └──────────┬──────────┘
//!            ▼
//!      FrameProcessor
//! ```
//!
//! [`CaptureSource`] ties these together and owns their lifecycle.

pub mod buffer_pool;
pub mod capture_source;
pub mod device_lock;
pub mod frame_channel;
pub mod frame_loop;
pub mod types;

pub use buffer_pool::{BufferHandle, BufferPool, FrameBuffer, PoolStats};
pub use capture_source::{CaptureSource, CaptureState, FrameSink};
pub use device_lock::{DeviceLock, DeviceLockGuard};
pub use frame_channel::{ChannelClosed, ChannelStats, FrameChannel, PublishOutcome, TakeError};
pub use frame_loop::{FrameLoopController, FrameProcessor, ProcessorSlot};
pub use types::*;

use crate::errors::CaptureResult;
use std::sync::Arc;

/// Capture backend trait
///
/// A device is driven by a single [`CaptureSource`]. Calls arrive in the
/// order `open`, `start_stream`, `stop_stream`, `close`, and the device may
/// be opened again after `close`.
pub trait CaptureDevice: Send {
    /// Identity, facing and sensor mounting of the device
    fn describe(&self) -> CameraDevice;

    /// Preview sizes the device can produce, paired with picture sizes
    fn supported_sizes(&self) -> Vec<SizeCandidate>;

    /// Pixel format frames will be delivered in
    fn preferred_format(&self) -> PixelFormat {
        PixelFormat::Nv21
    }

    /// Lock shared by every user of the physical device
    fn lock(&self) -> Arc<DeviceLock>;

    /// Open the device with the negotiated configuration
    fn open(&mut self, config: &StreamConfig) -> CaptureResult<()>;

    /// Begin delivering frames to `sink` from the device's own thread
    ///
    /// Must not block waiting for frames to be consumed.
    fn start_stream(&mut self, sink: FrameSink) -> CaptureResult<()>;

    /// Stop delivering frames. Returns once no more frames will be submitted.
    fn stop_stream(&mut self);

    fn close(&mut self);
}
