// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-size pool of frame buffers
//!
//! Capture devices fill buffers taken from this pool and hand them to the
//! frame channel inside a [`CameraFrame`](super::types::CameraFrame). Buffers
//! are addressed by a [`BufferHandle`] index into the pool's slot table and
//! go back onto the free list when the owning [`FrameBuffer`] is dropped, so
//! every buffer is returned exactly once no matter which stage drops it.

use std::sync::{Arc, Mutex, Weak};
use tracing::trace;

/// Index of a buffer slot inside a [`BufferPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u32);

impl BufferHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Maximum number of buffers the pool will ever allocate
    pub capacity: usize,
    /// Buffers allocated so far
    pub allocated: usize,
    /// Buffers parked on the free list
    pub available: usize,
    /// Buffers currently owned by frames
    pub in_use: usize,
    /// Total number of buffers returned to the pool
    pub recycled: u64,
    /// Acquire attempts that failed because every buffer was in use
    pub exhausted: u64,
}

struct PoolState {
    /// `Some` while the buffer is parked in the pool, `None` while checked out
    slots: Vec<Option<Vec<u8>>>,
    free: Vec<BufferHandle>,
    recycled: u64,
    exhausted: u64,
}

/// Pool of reusable frame buffers
pub struct BufferPool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Create a pool that allocates at most `capacity` buffers (lazily)
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            state: Mutex::new(PoolState {
                slots: Vec::with_capacity(capacity),
                free: Vec::with_capacity(capacity),
                recycled: 0,
                exhausted: 0,
            }),
        })
    }

    /// Check out a buffer of `len` bytes
    ///
    /// Returns `None` when every buffer is in use. The caller is expected to
    /// drop the incoming frame in that case rather than wait.
    pub fn acquire(self: &Arc<Self>, len: usize) -> Option<FrameBuffer> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let (handle, mut data) = if let Some(handle) = state.free.pop() {
            let data = state.slots[handle.index()].take().unwrap_or_default();
            (handle, data)
        } else if state.slots.len() < self.capacity {
            let handle = BufferHandle(state.slots.len() as u32);
            state.slots.push(None);
            trace!(handle = handle.0, len, "Allocated frame buffer");
            (handle, Vec::with_capacity(len))
        } else {
            state.exhausted += 1;
            return None;
        };
        drop(state);

        data.resize(len, 0);
        Some(FrameBuffer {
            handle,
            data,
            pool: Arc::downgrade(self),
        })
    }

    fn give_back(&self, handle: BufferHandle, data: Vec<u8>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let slot = &mut state.slots[handle.index()];
        debug_assert!(slot.is_none(), "buffer {:?} returned twice", handle);
        *slot = Some(data);
        state.free.push(handle);
        state.recycled += 1;
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let allocated = state.slots.len();
        let available = state.free.len();
        PoolStats {
            capacity: self.capacity,
            allocated,
            available,
            in_use: allocated - available,
            recycled: state.recycled,
            exhausted: state.exhausted,
        }
    }
}

/// A buffer checked out of a [`BufferPool`]
///
/// Returned to the pool on drop. If the pool is already gone the memory is
/// simply freed.
pub struct FrameBuffer {
    handle: BufferHandle,
    data: Vec<u8>,
    pool: Weak<BufferPool>,
}

impl FrameBuffer {
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Copy `src` into the start of the buffer, returning the bytes written
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.data.len());
        self.data[..n].copy_from_slice(&src[..n]);
        n
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.give_back(self.handle, std::mem::take(&mut self.data));
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameBuffer({:?}, {} bytes)", self.handle, self.data.len())
    }
}
