// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for the frame processing loop
//!
//! The processing loop runs on its own named thread. Each iteration takes the
//! newest frame from the [`FrameChannel`] and hands it to the installed
//! [`FrameProcessor`]. Because the loop is a single thread, at most one
//! frame is being processed at any time and no new frame is requested while
//! a processor call is still running.

use super::frame_channel::{FrameChannel, TakeError};
use super::types::CameraFrame;
use crate::errors::{CaptureError, CaptureResult};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Consumer of frames running on the processing thread
pub trait FrameProcessor: Send {
    /// Handle one frame. Called from the processing thread only.
    fn process(&mut self, frame: &CameraFrame);

    /// Called when no frame arrived within the idle tick
    fn on_idle(&mut self) {}

    /// Called once when the processor is replaced or the source is released
    fn stop(&mut self) {}
}

/// Slot holding the active processor
///
/// The loop holds the lock for the duration of a `process` call, so
/// installing a new processor waits for the in-flight call to finish.
pub type ProcessorSlot = Arc<Mutex<Option<Box<dyn FrameProcessor>>>>;

/// Controller for the processing loop thread
pub struct FrameLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Disconnects when the thread exits (including by panic)
    exited: Option<mpsc::Receiver<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    channel: Arc<FrameChannel>,
    frames_processed: Arc<AtomicU64>,
    /// Name for logging
    name: String,
}

impl FrameLoopController {
    /// Start the processing loop in a separate thread
    ///
    /// # Arguments
    ///
    /// * `name` - Thread name, also used in logging
    /// * `channel` - Source of frames
    /// * `processor` - Slot holding the processor to feed
    /// * `idle_tick` - How long to wait for a frame before calling `on_idle`
    pub fn start(
        name: &str,
        channel: Arc<FrameChannel>,
        processor: ProcessorSlot,
        idle_tick: Duration,
    ) -> CaptureResult<Self> {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let frames_processed = Arc::new(AtomicU64::new(0));
        let (exit_tx, exit_rx) = mpsc::channel::<()>();

        let thread_stop = Arc::clone(&stop_signal);
        let thread_channel = Arc::clone(&channel);
        let thread_count = Arc::clone(&frames_processed);
        let thread_name = name.to_string();

        info!(name = %name, "Starting frame processing loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _exit_tx = exit_tx;
                debug!(name = %thread_name, "Processing thread started");

                loop {
                    if thread_stop.load(Ordering::Acquire) {
                        debug!(name = %thread_name, "Stop signal received");
                        break;
                    }

                    match thread_channel.take_next_timeout(idle_tick) {
                        Ok(frame) => {
                            with_processor(&processor, &thread_name, |p| p.process(&frame));
                            thread_count.fetch_add(1, Ordering::Relaxed);
                            // Frame dropped here, buffer goes back to the pool
                        }
                        Err(TakeError::Timeout) => {
                            with_processor(&processor, &thread_name, |p| p.on_idle());
                        }
                        Err(TakeError::Closed) => {
                            debug!(name = %thread_name, "Frame channel closed");
                            break;
                        }
                    }
                }

                info!(name = %thread_name, "Processing thread exiting");
            })
            .map_err(|e| CaptureError::Setup(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            exited: Some(exit_rx),
            stop_signal,
            channel,
            frames_processed,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Number of frames handed to a processor so far
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait up to `timeout` for the thread to exit
    ///
    /// Closes the frame channel so a blocked consumer wakes up. If the thread
    /// does not exit in time it is detached and reported as leaked. Calling
    /// this again after it returned is a no-op.
    pub fn shutdown(&mut self, timeout: Duration) -> CaptureResult<()> {
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };

        debug!(name = %self.name, "Requesting processing loop stop");
        self.stop_signal.store(true, Ordering::Release);
        self.channel.close();

        let exited = self
            .exited
            .take()
            .map(|rx| rx.recv_timeout(timeout))
            .unwrap_or(Err(RecvTimeoutError::Disconnected));

        if let Err(RecvTimeoutError::Timeout) = exited {
            error!(
                name = %self.name,
                ?timeout,
                "Processing thread did not exit in time, leaking it"
            );
            drop(handle);
            return Err(CaptureError::ShutdownTimeout(timeout));
        }

        if let Err(e) = handle.join() {
            warn!(name = %self.name, panic = %panic_message(&*e), "Processing thread panicked");
        } else {
            debug!(name = %self.name, "Processing thread finished");
        }
        Ok(())
    }
}

impl Drop for FrameLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "FrameLoopController dropped, stopping loop");
            if let Err(e) = self.shutdown(crate::constants::SHUTDOWN_TIMEOUT) {
                warn!(name = %self.name, error = %e, "Processing loop shutdown failed");
            }
        }
    }
}

/// Run `f` against the installed processor, containing panics
fn with_processor<F>(slot: &ProcessorSlot, name: &str, f: F)
where
    F: FnOnce(&mut dyn FrameProcessor),
{
    let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(processor) = guard.as_mut() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(processor.as_mut())));
        if let Err(e) = result {
            warn!(name = %name, panic = %panic_message(&*e), "Frame processor panicked, continuing");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
