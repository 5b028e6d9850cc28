// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Local media tracks and the sample writers behind them.

use crate::core::video::VideoFrame;
use crate::core::{Result, StreamError};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Consumer of raw frames delivered through a video track.
pub trait VideoSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

/// Destination for encoded samples of one RTP stream.
pub trait SampleWriter: Send + Sync {
    fn write_sample<'a>(&'a self, sample: &'a Sample) -> BoxFuture<'a, Result<()>>;
}

impl SampleWriter for TrackLocalStaticSample {
    fn write_sample<'a>(&'a self, sample: &'a Sample) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            TrackLocalStaticSample::write_sample(self, sample)
                .await
                .map_err(|e| StreamError::Runtime(format!("Failed to write sample: {}", e)))
        })
    }
}

struct VideoTrackInner {
    id: String,
    stream_id: String,
    enabled: AtomicBool,
    sinks: RwLock<Vec<Arc<dyn VideoSink>>>,
}

/// Video track fed by a capture source. Clones share state.
#[derive(Clone)]
pub struct VideoTrack {
    inner: Arc<VideoTrackInner>,
}

impl VideoTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(VideoTrackInner {
                id: id.into(),
                stream_id: stream_id.into(),
                enabled: AtomicBool::new(true),
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// A disabled track keeps flowing but carries black frames.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn add_sink(&self, sink: Arc<dyn VideoSink>) {
        self.inner.sinks.write().push(sink);
    }

    pub fn remove_sink(&self, sink: &Arc<dyn VideoSink>) {
        self.inner.sinks.write().retain(|s| !Arc::ptr_eq(s, sink));
    }

    pub fn clear_sinks(&self) {
        self.inner.sinks.write().clear();
    }

    pub fn sink_count(&self) -> usize {
        self.inner.sinks.read().len()
    }

    pub fn deliver(&self, frame: &VideoFrame) {
        let sinks = self.inner.sinks.read().clone();
        for sink in sinks {
            sink.on_frame(frame);
        }
    }

    pub fn ptr_eq(&self, other: &VideoTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct AudioTrackInner {
    id: String,
    stream_id: String,
    enabled: AtomicBool,
}

/// Audio track fed by the audio transport.
#[derive(Clone)]
pub struct AudioTrack {
    inner: Arc<AudioTrackInner>,
}

impl AudioTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AudioTrackInner {
                id: id.into(),
                stream_id: stream_id.into(),
                enabled: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// A disabled track sends silence.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }
}

/// Either kind of local track.
#[derive(Clone)]
pub enum MediaTrack {
    Video(VideoTrack),
    Audio(AudioTrack),
}

impl MediaTrack {
    pub fn id(&self) -> &str {
        match self {
            MediaTrack::Video(t) => t.id(),
            MediaTrack::Audio(t) => t.id(),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        match self {
            MediaTrack::Video(t) => t.set_enabled(enabled),
            MediaTrack::Audio(t) => t.set_enabled(enabled),
        }
    }
}
