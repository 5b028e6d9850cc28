// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Audio transport that paces captured frames onto the send path.

use super::frame_buffer::{AudioFrame, AudioSink, FRAME_DURATION_MS};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const TRANSPORT_SAMPLE_RATE: u32 = 48_000;
pub const TRANSPORT_CHANNELS: usize = 2;
pub const MAX_VOLUME: u32 = 14392;

/// Frames held before the oldest are dropped (half a second).
const QUEUE_CAPACITY: usize = 50;

/// How far the pacer may fall behind before it resynchronises.
const MAX_LAG: Duration = Duration::from_millis(100);

/// Receives exactly one 10 ms frame per tick while recording.
pub trait AudioTransportCallback: Send + Sync {
    fn recorded_data_available(&self, frame: &AudioFrame);
}

struct TransportInner {
    queue: Mutex<VecDeque<AudioFrame>>,
    callback: RwLock<Option<Arc<dyn AudioTransportCallback>>>,
    recording: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    volume: AtomicU32,
    delivered: AtomicU64,
    underruns: AtomicU64,
}

/// Process-wide audio device stand-in. Clones share state.
#[derive(Clone)]
pub struct AudioTransport {
    inner: Arc<TransportInner>,
}

impl Default for AudioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
                callback: RwLock::new(None),
                recording: AtomicBool::new(false),
                task: Mutex::new(None),
                volume: AtomicU32::new(MAX_VOLUME),
                delivered: AtomicU64::new(0),
                underruns: AtomicU64::new(0),
            }),
        }
    }

    pub fn register_callback(&self, callback: Option<Arc<dyn AudioTransportCallback>>) {
        *self.inner.callback.write() = callback;
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recording.load(Ordering::Acquire)
    }

    pub fn max_volume(&self) -> u32 {
        MAX_VOLUME
    }

    pub fn volume(&self) -> u32 {
        self.inner.volume.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, volume: u32) {
        self.inner.volume.store(volume.min(MAX_VOLUME), Ordering::Relaxed);
    }

    pub fn frames_delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.inner.underruns.load(Ordering::Relaxed)
    }

    pub fn queued_frames(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Start the pacing task on `handle`. A second call is a no-op.
    pub fn start_recording(&self, handle: &tokio::runtime::Handle) {
        if self.inner.recording.swap(true, Ordering::AcqRel) {
            tracing::warn!("[AudioTransport] Already recording");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let task = handle.spawn(async move {
            let period = Duration::from_millis(FRAME_DURATION_MS as u64);
            let mut deadline = Instant::now() + period;
            loop {
                tokio::time::sleep_until(deadline).await;
                if !inner.recording.load(Ordering::Acquire) {
                    break;
                }
                inner.deliver_one();

                deadline += period;
                let now = Instant::now();
                if now > deadline + MAX_LAG {
                    tracing::debug!("[AudioTransport] Pacer fell behind, resynchronising");
                    deadline = now + period;
                }
            }
        });
        *self.inner.task.lock() = Some(task);
        tracing::info!("[AudioTransport] Recording started");
    }

    pub fn stop_recording(&self) {
        if !self.inner.recording.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        self.inner.queue.lock().clear();
        tracing::info!(
            "[AudioTransport] Recording stopped ({} frames, {} underruns)",
            self.frames_delivered(),
            self.underruns()
        );
    }
}

impl TransportInner {
    fn deliver_one(&self) {
        let frame = self.queue.lock().pop_front();
        let frame = frame.unwrap_or_else(|| {
            self.underruns.fetch_add(1, Ordering::Relaxed);
            AudioFrame::silence(
                TRANSPORT_SAMPLE_RATE,
                TRANSPORT_CHANNELS,
                (TRANSPORT_SAMPLE_RATE * FRAME_DURATION_MS / 1000) as usize,
            )
        });
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback.recorded_data_available(&frame);
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

impl AudioSink for AudioTransport {
    fn on_data(&self, frame: &AudioFrame) {
        if !self.is_recording() {
            return;
        }
        let mut queue = self.inner.queue.lock();
        if queue.len() >= QUEUE_CAPACITY {
            queue.pop_front();
            tracing::trace!("[AudioTransport] Queue full, dropping oldest frame");
        }
        queue.push_back(frame.clone());
    }
}
