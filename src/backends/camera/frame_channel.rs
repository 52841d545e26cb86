// SPDX-License-Identifier: GPL-3.0-only

//! Latest-wins frame hand-off between the capture and processing threads
//!
//! The channel holds at most one frame. Publishing while a frame is still
//! waiting replaces it, and the replaced frame is dropped, which returns its
//! buffer to the pool. The consumer always gets the newest frame and may
//! skip intermediate ones, so a slow detector never builds up a backlog.
//!
//! ```text
//!  capture thread              processing thread
//!  ──────────────              ─────────────────
//!  publish(f1) ──► [ f1 ]
//!  publish(f2) ──► [ f2 ]  (f1 recycled)
//!                  [ f2 ] ──► take_next() = f2
//!                  [    ]     take_next() blocks ...
//!  publish(f3) ──► [ f3 ] ──► ... wakes with f3
//! ```

use super::types::CameraFrame;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Result of a [`FrameChannel::publish`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The slot was empty and now holds the frame
    Delivered,
    /// An unconsumed frame was recycled and replaced
    Replaced,
    /// The channel is closed; the frame was recycled
    Rejected,
}

/// Returned by [`FrameChannel::take_next`] once the channel is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame channel closed")]
pub struct ChannelClosed;

/// Error from [`FrameChannel::take_next_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TakeError {
    #[error("no frame within the timeout")]
    Timeout,
    #[error("frame channel closed")]
    Closed,
}

/// Counters describing channel traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    /// Frames accepted by `publish`
    pub published: u64,
    /// Frames replaced before a consumer took them
    pub dropped: u64,
    /// Frames handed to the consumer
    pub taken: u64,
    /// Frames waiting in the slot (0 or 1)
    pub pending: usize,
}

#[derive(Default)]
struct Slot {
    frame: Option<CameraFrame>,
    closed: bool,
    published: u64,
    dropped: u64,
    taken: u64,
}

/// Single-slot, single-consumer frame channel
#[derive(Default)]
pub struct FrameChannel {
    slot: Mutex<Slot>,
    available: Condvar,
}

impl FrameChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand a frame to the consumer without waiting for it
    pub fn publish(&self, frame: CameraFrame) -> PublishOutcome {
        let mut slot = self.lock();
        if slot.closed {
            drop(slot);
            trace!(sequence = frame.sequence, "Frame rejected, channel closed");
            return PublishOutcome::Rejected;
        }

        slot.published += 1;
        let replaced = slot.frame.replace(frame);
        let outcome = if replaced.is_some() {
            slot.dropped += 1;
            PublishOutcome::Replaced
        } else {
            PublishOutcome::Delivered
        };
        drop(slot);
        self.available.notify_one();

        // Recycle outside the lock
        if let Some(old) = replaced {
            trace!(sequence = old.sequence, "Dropped stale frame");
        }
        outcome
    }

    /// Block until a frame is available and take it
    ///
    /// Returns immediately with [`ChannelClosed`] once the channel is closed,
    /// even if a frame was still buffered.
    pub fn take_next(&self) -> Result<CameraFrame, ChannelClosed> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                let stale = slot.frame.take();
                drop(slot);
                drop(stale);
                return Err(ChannelClosed);
            }
            if let Some(frame) = slot.frame.take() {
                slot.taken += 1;
                return Ok(frame);
            }
            slot = self
                .available
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`take_next`](Self::take_next) but gives up after `timeout`
    pub fn take_next_timeout(&self, timeout: Duration) -> Result<CameraFrame, TakeError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.closed {
                let stale = slot.frame.take();
                drop(slot);
                drop(stale);
                return Err(TakeError::Closed);
            }
            if let Some(frame) = slot.frame.take() {
                slot.taken += 1;
                return Ok(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TakeError::Timeout);
            }
            let (guard, _) = self
                .available
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            slot = guard;
        }
    }

    /// Close the channel and wake any waiting consumer
    ///
    /// Later `publish` calls are rejected. Closing twice is harmless.
    pub fn close(&self) {
        let mut slot = self.lock();
        if slot.closed {
            return;
        }
        slot.closed = true;
        let stale = slot.frame.take();
        drop(slot);
        self.available.notify_all();
        drop(stale);
        debug!("Frame channel closed");
    }

    /// Recycle a buffered frame without handing it to the consumer
    ///
    /// Returns true if a frame was discarded.
    pub fn drain(&self) -> bool {
        let stale = self.lock().frame.take();
        stale.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> ChannelStats {
        let slot = self.lock();
        ChannelStats {
            published: slot.published,
            dropped: slot.dropped,
            taken: slot.taken,
            pending: usize::from(slot.frame.is_some()),
        }
    }
}
