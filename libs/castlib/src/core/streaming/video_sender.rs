// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Encodes frames from a video track and writes them to per-layer RTP writers.

use super::frame_metadata::FrameTransformer;
use super::track::{SampleWriter, VideoSink, VideoTrack};
use crate::core::codec::{
    CodecSpecificInfo, EncodedImage, RateControlParameters, VideoEncoder, VideoEncoderConfig,
    VideoFrameType,
};
use crate::core::video::{I420Buffer, VideoFrame, VideoFrameBuffer};
use crate::core::{Result, StreamError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::media::Sample;

struct SenderInner {
    encoder: Mutex<Option<Box<dyn VideoEncoder>>>,
    track: VideoTrack,
    key_frame_requested: AtomicBool,
    frames_in: AtomicU64,
    frames_out: Arc<AtomicU64>,
}

/// Sink that owns the session's video encoder.
#[derive(Clone)]
pub struct VideoSender {
    inner: Arc<SenderInner>,
}

impl VideoSender {
    /// Initialise `encoder` and attach the writer task on `handle`.
    ///
    /// `writers[i]` receives images for spatial layer `i`.
    pub fn new(
        mut encoder: Box<dyn VideoEncoder>,
        config: &VideoEncoderConfig,
        track: VideoTrack,
        writers: Vec<Arc<dyn SampleWriter>>,
        transformer: Option<FrameTransformer>,
        handle: &tokio::runtime::Handle,
    ) -> Result<Self> {
        if writers.is_empty() {
            return Err(StreamError::Configuration("Video sender needs at least one writer".into()));
        }
        encoder.init_encode(config)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Sample)>();
        let frame_duration = Duration::from_secs_f64(1.0 / config.max_framerate.max(1) as f64);
        encoder.register_encode_complete_callback(Some(Arc::new(
            move |image: &EncodedImage, _info: &CodecSpecificInfo| {
                let layer = image.spatial_index.unwrap_or(0);
                let data = match &transformer {
                    Some(t) => t.transform(layer as u32, image.rtp_timestamp, &image.data),
                    None => image.data.clone(),
                };
                let sample = Sample {
                    data: Bytes::from(data),
                    duration: frame_duration,
                    ..Default::default()
                };
                let _ = tx.send((layer, sample));
            },
        )));

        let frames_out = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&frames_out);
        handle.spawn(async move {
            while let Some((layer, sample)) = rx.recv().await {
                let Some(writer) = writers.get(layer) else {
                    tracing::debug!("[VideoSender] No writer for layer {}", layer);
                    continue;
                };
                match writer.write_sample(&sample).await {
                    Ok(()) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::debug!("[VideoSender] {}", e),
                }
            }
        });

        tracing::info!(
            "[VideoSender] {} ready at {}x{}",
            encoder.encoder_info().implementation_name,
            config.width,
            config.height
        );

        Ok(Self {
            inner: Arc::new(SenderInner {
                encoder: Mutex::new(Some(encoder)),
                track,
                key_frame_requested: AtomicBool::new(true),
                frames_in: AtomicU64::new(0),
                frames_out,
            }),
        })
    }

    pub fn request_key_frame(&self) {
        self.inner.key_frame_requested.store(true, Ordering::Release);
    }

    pub fn set_rates(&self, parameters: RateControlParameters) {
        if let Some(encoder) = self.inner.encoder.lock().as_mut() {
            encoder.set_rates(parameters);
        }
    }

    pub fn frames_encoded(&self) -> u64 {
        self.inner.frames_in.load(Ordering::Relaxed)
    }

    pub fn samples_written(&self) -> u64 {
        self.inner.frames_out.load(Ordering::Relaxed)
    }

    /// Release the encoder. Frames arriving afterwards are ignored.
    pub fn release(&self) {
        if let Some(mut encoder) = self.inner.encoder.lock().take() {
            if let Err(e) = encoder.release() {
                tracing::warn!("[VideoSender] Encoder release failed: {}", e);
            }
            tracing::info!("[VideoSender] Released");
        }
    }
}

impl VideoSink for VideoSender {
    fn on_frame(&self, frame: &VideoFrame) {
        let mut guard = self.inner.encoder.lock();
        let Some(encoder) = guard.as_mut() else {
            return;
        };

        let muted;
        let frame = if self.inner.track.enabled() {
            frame
        } else {
            muted = VideoFrame::new(
                VideoFrameBuffer::I420(Arc::new(I420Buffer::black(frame.width(), frame.height()))),
                frame.timestamp_us,
            );
            &muted
        };

        let frame_type = if self.inner.key_frame_requested.swap(false, Ordering::AcqRel) {
            VideoFrameType::Key
        } else {
            VideoFrameType::Delta
        };
        match encoder.encode(frame, &[frame_type]) {
            Ok(()) => {
                self.inner.frames_in.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                if frame_type == VideoFrameType::Key {
                    self.request_key_frame();
                }
                tracing::warn!("[VideoSender] Encode failed: {}", e);
            }
        }
    }
}
