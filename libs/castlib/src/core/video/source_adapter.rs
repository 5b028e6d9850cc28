// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Turns captured textures into video frames on a track.

use super::encoder_context::EncoderContext;
use super::frame_buffer::{NativeFrameBuffer, SimulcastFrameBuffer, VideoFrame, VideoFrameBuffer};
use super::texture::{GpuDevice, Texture};
use crate::core::Result;
use crate::core::stats::PublisherStats;
use crate::core::streaming::VideoTrack;
use std::sync::Arc;

/// Spatial layers produced when simulcast is on: full, half and quarter size.
pub const SIMULCAST_LAYERS: usize = 3;

/// Size of simulcast layer `index` for a full-size capture.
pub fn layer_resolution(width: u32, height: u32, index: usize) -> (u32, u32) {
    ((width >> index).max(1), (height >> index).max(1))
}

pub struct VideoSourceAdapter {
    contexts: Vec<EncoderContext>,
    track: VideoTrack,
    stats: Option<Arc<PublisherStats>>,
}

impl VideoSourceAdapter {
    pub fn new(
        gpu: Arc<dyn GpuDevice>,
        width: u32,
        height: u32,
        simulcast: bool,
        fixed_resolution: bool,
        track: VideoTrack,
    ) -> Result<Self> {
        let layers = if simulcast { SIMULCAST_LAYERS } else { 1 };
        let contexts = (0..layers)
            .map(|i| {
                let (w, h) = layer_resolution(width, height, i);
                EncoderContext::new(Arc::clone(&gpu), w, h, fixed_resolution)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            contexts,
            track,
            stats: None,
        })
    }

    pub fn with_stats(mut self, stats: Arc<PublisherStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn track(&self) -> &VideoTrack {
        &self.track
    }

    pub fn is_simulcast(&self) -> bool {
        self.contexts.len() > 1
    }

    pub fn layer_resolutions(&self) -> Vec<(u32, u32)> {
        self.contexts.iter().map(|c| c.resolution()).collect()
    }

    pub fn contexts(&self) -> &[EncoderContext] {
        &self.contexts
    }

    /// Copy `texture` into every layer and deliver one frame to the track.
    ///
    /// Returns false when the frame was dropped.
    pub fn on_frame_ready(&self, texture: &dyn Texture, timestamp_us: i64) -> bool {
        let desc = texture.descriptor();

        for (i, ctx) in self.contexts.iter().enumerate() {
            let (w, h) = layer_resolution(desc.width, desc.height, i);
            if let Err(e) = ctx.set_resolution(w, h) {
                tracing::warn!("[VideoSourceAdapter] Dropping frame: {}", e);
                return false;
            }
        }

        let mut layers = Vec::with_capacity(self.contexts.len());
        for ctx in &self.contexts {
            let Some(input) = ctx.copy_from(texture, timestamp_us) else {
                return false;
            };
            layers.push(Arc::new(NativeFrameBuffer::new(input)));
        }

        let buffer = if self.is_simulcast() {
            let mut simulcast = SimulcastFrameBuffer::new();
            for layer in layers {
                simulcast.add_layer(layer);
            }
            VideoFrameBuffer::Simulcast(Arc::new(simulcast))
        } else {
            match layers.pop() {
                Some(layer) => VideoFrameBuffer::Native(layer),
                None => return false,
            }
        };

        if let Some(stats) = &self.stats {
            stats.frame_rendered();
        }

        self.track.deliver(&VideoFrame::new(buffer, timestamp_us));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::streaming::VideoSink;
    use crate::core::video::texture::{CpuDevice, CpuTexture, TextureDescriptor};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Vec<(u32, u32)>>>);

    impl VideoSink for Collect {
        fn on_frame(&self, frame: &VideoFrame) {
            let mut sizes = Vec::new();
            let mut i = 0;
            while let Some(layer) = frame.buffer.layer(i) {
                sizes.push((layer.width(), layer.height()));
                i += 1;
            }
            self.0.lock().push(sizes);
        }
    }

    fn adapter(simulcast: bool, fixed: bool) -> (VideoSourceAdapter, Arc<Collect>) {
        let track = VideoTrack::new("video", "stream");
        let sink = Arc::new(Collect::default());
        track.add_sink(sink.clone());
        let adapter =
            VideoSourceAdapter::new(Arc::new(CpuDevice::new()), 1280, 720, simulcast, fixed, track)
                .unwrap();
        (adapter, sink)
    }

    #[test]
    fn test_simulcast_produces_three_layers() {
        let (adapter, sink) = adapter(true, false);
        let texture = CpuTexture::new(TextureDescriptor::new(1280, 720));
        assert!(adapter.on_frame_ready(&texture, 0));

        let frames = sink.0.lock();
        assert_eq!(frames[0], vec![(1280, 720), (640, 360), (320, 180)]);
    }

    #[test]
    fn test_resolution_change_reconfigures_layers() {
        let (adapter, sink) = adapter(false, false);
        assert!(adapter.on_frame_ready(&CpuTexture::new(TextureDescriptor::new(1280, 720)), 0));
        assert!(adapter.on_frame_ready(&CpuTexture::new(TextureDescriptor::new(1920, 1080)), 1));

        let frames = sink.0.lock();
        assert_eq!(frames[0], vec![(1280, 720)]);
        assert_eq!(frames[1], vec![(1920, 1080)]);
        assert_eq!(adapter.layer_resolutions(), vec![(1920, 1080)]);
    }

    #[test]
    fn test_fixed_resolution_scales_into_configured_size() {
        let (adapter, sink) = adapter(false, true);
        assert!(adapter.on_frame_ready(&CpuTexture::new(TextureDescriptor::new(1920, 1080)), 0));
        assert_eq!(sink.0.lock()[0], vec![(1280, 720)]);
    }

    #[test]
    fn test_frames_recycle_after_sinks_release_them() {
        let (adapter, _sink) = adapter(false, false);
        let texture = CpuTexture::new(TextureDescriptor::new(1280, 720));
        for ts in 0..10 {
            assert!(adapter.on_frame_ready(&texture, ts));
        }
        assert_eq!(adapter.contexts()[0].pool().in_flight(), 0);
    }
}
