// SPDX-License-Identifier: GPL-3.0-only

//! Exclusive access to a capture device
//!
//! A device can only be opened by one capture source at a time. Opening
//! waits a bounded time for the current holder to let go; if it does not,
//! the caller reports the device as busy instead of hanging.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Binary semaphore guarding a capture device
#[derive(Default)]
pub struct DeviceLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl DeviceLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait up to `timeout` for exclusive access
    pub fn try_acquire_for(self: &Arc<Self>, timeout: Duration) -> Option<DeviceLockGuard> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while *held {
            let now = Instant::now();
            if now >= deadline {
                debug!(?timeout, "Timed out waiting for device lock");
                return None;
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            held = guard;
        }
        *held = true;
        Some(DeviceLockGuard {
            lock: Arc::clone(self),
        })
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self) {
        *self.held.lock().unwrap_or_else(|e| e.into_inner()) = false;
        self.released.notify_one();
    }
}

/// Held while a capture source has the device open; releases on drop
pub struct DeviceLockGuard {
    lock: Arc<DeviceLock>,
}

impl Drop for DeviceLockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
