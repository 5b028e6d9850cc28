// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Recyclable encoder input frames.
//!
//! The pool is an arena of slots. [`EncoderInputPool::obtain`] hands out an
//! [`InputFrameHandle`]; cloning the handle adds a reference and dropping the
//! last clone returns the slot. A slot whose resolution is stale at that point
//! is destroyed instead of recycled, and its destroy callbacks run exactly once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

/// Stable identity of a pool slot for its whole lifetime.
pub type FrameId = u64;

type DestroyCallback = Box<dyn FnOnce(FrameId) + Send>;

struct Slot {
    id: FrameId,
    generation: u64,
    on_destroy: Vec<DestroyCallback>,
}

impl Slot {
    fn destroy(self) {
        for callback in self.on_destroy {
            callback(self.id);
        }
    }
}

struct PoolState {
    width: u32,
    height: u32,
    generation: u64,
    next_id: FrameId,
    free: Vec<Slot>,
    in_use: HashMap<FrameId, Slot>,
}

impl PoolState {
    fn current_generation_count(&self) -> usize {
        self.free.len()
            + self
                .in_use
                .values()
                .filter(|slot| slot.generation == self.generation)
                .count()
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    max_buffers: usize,
}

impl PoolInner {
    fn release(&self, id: FrameId) {
        let destroyed = {
            let mut state = self.state.lock();
            let Some(slot) = state.in_use.remove(&id) else {
                return;
            };
            if slot.generation == state.generation {
                state.free.push(slot);
                None
            } else {
                Some(slot)
            }
        };

        if let Some(slot) = destroyed {
            tracing::trace!("[EncoderInput] Destroying stale frame {}", slot.id);
            slot.destroy();
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let slots: Vec<Slot> = state
            .free
            .drain(..)
            .chain(state.in_use.drain().map(|(_, slot)| slot))
            .collect();
        for slot in slots {
            slot.destroy();
        }
    }
}

/// Pool of at most `max_buffers` frames at the current resolution.
#[derive(Clone)]
pub struct EncoderInputPool {
    inner: Arc<PoolInner>,
}

impl EncoderInputPool {
    /// Frames kept per resolution.
    pub const DEFAULT_MAX_BUFFERS: usize = 3;

    pub fn new(width: u32, height: u32, max_buffers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    width,
                    height,
                    generation: 0,
                    next_id: 0,
                    free: Vec::new(),
                    in_use: HashMap::new(),
                }),
                max_buffers,
            }),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        let state = self.inner.state.lock();
        (state.width, state.height)
    }

    /// Take a free frame, allocating one if the pool is below capacity.
    ///
    /// Returns `None` when every frame is claimed.
    pub fn obtain(&self) -> Option<InputFrameHandle> {
        let mut state = self.inner.state.lock();

        let slot = match state.free.pop() {
            Some(slot) => slot,
            None if state.current_generation_count() < self.inner.max_buffers => {
                let id = state.next_id;
                state.next_id += 1;
                tracing::debug!(
                    "[EncoderInput] Allocated frame {} ({}x{})",
                    id,
                    state.width,
                    state.height
                );
                Slot {
                    id,
                    generation: state.generation,
                    on_destroy: Vec::new(),
                }
            }
            None => return None,
        };

        let handle = InputFrameHandle {
            inner: Arc::new(HandleInner {
                pool: Arc::downgrade(&self.inner),
                id: slot.id,
                width: state.width,
                height: state.height,
                timestamp_us: AtomicI64::new(0),
            }),
        };
        state.in_use.insert(slot.id, slot);
        Some(handle)
    }

    /// Switch to a new resolution and flush.
    ///
    /// Unclaimed frames are destroyed now. Claimed frames finish their encode
    /// and are destroyed when their last handle drops.
    pub fn reconfigure(&self, width: u32, height: u32) {
        let flushed = {
            let mut state = self.inner.state.lock();
            state.width = width;
            state.height = height;
            state.generation += 1;
            std::mem::take(&mut state.free)
        };

        tracing::debug!(
            "[EncoderInput] Reconfigured to {}x{}, flushed {} idle frames",
            width,
            height,
            flushed.len()
        );

        for slot in flushed {
            slot.destroy();
        }
    }

    /// Frames that are allocated and not claimed.
    pub fn available(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Frames currently claimed, including stale ones still being encoded.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_use.len()
    }

    pub fn max_buffers(&self) -> usize {
        self.inner.max_buffers
    }
}

struct HandleInner {
    pool: Weak<PoolInner>,
    id: FrameId,
    width: u32,
    height: u32,
    timestamp_us: AtomicI64,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(self.id);
        }
    }
}

/// Claimed encoder input frame. Clones share one claim.
#[derive(Clone)]
pub struct InputFrameHandle {
    inner: Arc<HandleInner>,
}

impl InputFrameHandle {
    pub fn id(&self) -> FrameId {
        self.inner.id
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn timestamp_us(&self) -> i64 {
        self.inner.timestamp_us.load(Ordering::Acquire)
    }

    pub fn set_timestamp_us(&self, timestamp_us: i64) {
        self.inner.timestamp_us.store(timestamp_us, Ordering::Release);
    }

    /// Run `callback` when the slot behind this frame is destroyed.
    pub fn on_destroy<F>(&self, callback: F)
    where
        F: FnOnce(FrameId) + Send + 'static,
    {
        let Some(pool) = self.inner.pool.upgrade() else {
            callback(self.inner.id);
            return;
        };
        let mut state = pool.state.lock();
        if let Some(slot) = state.in_use.get_mut(&self.inner.id) {
            slot.on_destroy.push(Box::new(callback));
        }
    }

    /// Number of live clones of this claim.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for InputFrameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputFrameHandle")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pool_caps_frames_and_recycles_on_drop() {
        let pool = EncoderInputPool::new(1280, 720, 3);
        let a = pool.obtain().unwrap();
        let b = pool.obtain().unwrap();
        let c = pool.obtain().unwrap();
        assert!(pool.obtain().is_none());

        let recycled_id = b.id();
        drop(b);
        assert_eq!(pool.available(), 1);

        let d = pool.obtain().unwrap();
        assert_eq!(d.id(), recycled_id);
        drop((a, c, d));
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_clone_keeps_frame_claimed() {
        let pool = EncoderInputPool::new(64, 64, 1);
        let frame = pool.obtain().unwrap();
        let extra = frame.clone();
        assert_eq!(frame.ref_count(), 2);

        drop(frame);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.in_flight(), 1);

        drop(extra);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_reconfigure_destroys_idle_frames_once() {
        let pool = EncoderInputPool::new(64, 64, 3);
        let destroyed = Arc::new(AtomicUsize::new(0));

        let frame = pool.obtain().unwrap();
        let counter = Arc::clone(&destroyed);
        frame.on_destroy(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(frame);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        pool.reconfigure(128, 128);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 0);

        drop(pool);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_in_flight_frame_survives_reconfigure() {
        let pool = EncoderInputPool::new(1280, 720, 3);
        let destroyed = Arc::new(AtomicUsize::new(0));

        let in_flight = pool.obtain().unwrap();
        let counter = Arc::clone(&destroyed);
        in_flight.on_destroy(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        pool.reconfigure(1920, 1080);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert_eq!((in_flight.width(), in_flight.height()), (1280, 720));

        let fresh = pool.obtain().unwrap();
        assert_eq!((fresh.width(), fresh.height()), (1920, 1080));

        drop(in_flight);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        // The stale frame does not come back into the pool
        drop(fresh);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_stale_frames_do_not_count_against_capacity() {
        let pool = EncoderInputPool::new(64, 64, 1);
        let old = pool.obtain().unwrap();
        pool.reconfigure(32, 32);
        let new = pool.obtain();
        assert!(new.is_some());
        drop(old);
    }
}
