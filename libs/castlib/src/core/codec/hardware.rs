// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GPU encoder wrapper and backend selection.

use super::encoder::{
    now_ms, wants_key_frame, CodecSpecificInfo, EncodeCompleteCallback, EncodedImage, EncoderInfo,
    RateControlParameters, VideoEncoder, VideoEncoderConfig, VideoFrameType,
};
use super::VideoCodecKind;
use crate::core::stats::PublisherStats;
use crate::core::video::{EncoderBackend, GpuDescriptor, NativeFrameBuffer, VideoFrame, VideoFrameBuffer};
use crate::core::{Result, StreamError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardwareEncoderSettings {
    pub codec: VideoCodecKind,
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub framerate: f64,
}

/// Output of one hardware encode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwarePacket {
    pub data: Vec<u8>,
    pub key_frame: bool,
    pub qp: i32,
}

/// A vendor encoder session consuming native frames.
pub trait HardwareEncoderBackend: Send {
    fn backend(&self) -> EncoderBackend;

    fn configure(&mut self, settings: &HardwareEncoderSettings) -> Result<()>;

    fn encode(&mut self, input: &NativeFrameBuffer, force_key_frame: bool) -> Result<Vec<HardwarePacket>>;

    fn release(&mut self);
}

/// Creates backend sessions for one [`EncoderBackend`].
pub trait HardwareEncoderProvider: Send + Sync {
    fn backend(&self) -> EncoderBackend;

    fn supports(&self, codec: VideoCodecKind) -> bool;

    fn create(&self, codec: VideoCodecKind) -> Result<Box<dyn HardwareEncoderBackend>>;
}

/// Hardware encoder providers available to this process.
#[derive(Default)]
pub struct HardwareEncoderRegistry {
    providers: RwLock<Vec<Arc<dyn HardwareEncoderProvider>>>,
}

impl HardwareEncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn HardwareEncoderProvider>) {
        tracing::info!("[HardwareEncoder] Registered {} provider", provider.backend());
        self.providers.write().push(provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    pub fn supports(&self, gpu: &GpuDescriptor, codec: VideoCodecKind) -> bool {
        self.provider_for(gpu, codec).is_some()
    }

    fn provider_for(
        &self,
        gpu: &GpuDescriptor,
        codec: VideoCodecKind,
    ) -> Option<Arc<dyn HardwareEncoderProvider>> {
        let backend = EncoderBackend::probe(gpu)?;
        self.providers
            .read()
            .iter()
            .find(|p| p.backend() == backend && p.supports(codec))
            .cloned()
    }

    /// Probe the GPU and open a session on the matching backend.
    pub fn create(&self, gpu: &GpuDescriptor, codec: VideoCodecKind) -> Result<Box<dyn HardwareEncoderBackend>> {
        let provider = self.provider_for(gpu, codec).ok_or_else(|| {
            StreamError::Resource(format!(
                "No hardware {} encoder available for {:?}/{:?}",
                codec, gpu.api, gpu.vendor
            ))
        })?;
        provider.create(codec)
    }
}

/// [`VideoEncoder`] over a [`HardwareEncoderBackend`].
///
/// Rate changes are held until the next encode so they never race an
/// encode in flight.
pub struct HardwareVideoEncoder {
    backend: Box<dyn HardwareEncoderBackend>,
    kind: EncoderBackend,
    settings: Option<HardwareEncoderSettings>,
    pending_rates: Option<RateControlParameters>,
    callback: Arc<Mutex<Option<EncodeCompleteCallback>>>,
    spatial_index: Option<usize>,
    stats: Option<Arc<PublisherStats>>,
}

impl HardwareVideoEncoder {
    pub fn new(backend: Box<dyn HardwareEncoderBackend>) -> Self {
        let kind = backend.backend();
        Self {
            backend,
            kind,
            settings: None,
            pending_rates: None,
            callback: Arc::new(Mutex::new(None)),
            spatial_index: None,
            stats: None,
        }
    }

    /// Encode only this layer of simulcast input.
    pub fn with_spatial_index(mut self, index: usize) -> Self {
        self.spatial_index = Some(index);
        self
    }

    pub fn with_stats(mut self, stats: Arc<PublisherStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    fn select_input(&self, frame: &VideoFrame) -> Result<Option<Arc<NativeFrameBuffer>>> {
        let buffer = match &frame.buffer {
            VideoFrameBuffer::I420(i420) if i420.is_black() => return Ok(None),
            VideoFrameBuffer::I420(_) => {
                return Err(StreamError::NotSupported(
                    "Hardware encoder requires native frames".into(),
                ))
            }
            other => other.layer(self.spatial_index.unwrap_or(0)),
        };
        match buffer {
            Some(VideoFrameBuffer::Native(native)) => Ok(Some(native)),
            _ => Err(StreamError::Runtime(format!(
                "Frame has no layer {}",
                self.spatial_index.unwrap_or(0)
            ))),
        }
    }

    fn emit(&self, image: &EncodedImage, info: &CodecSpecificInfo) {
        let guard = self.callback.lock();
        if let Some(callback) = guard.as_ref() {
            callback(image, info);
        }
    }
}

impl VideoEncoder for HardwareVideoEncoder {
    fn init_encode(&mut self, config: &VideoEncoderConfig) -> Result<()> {
        let settings = HardwareEncoderSettings {
            codec: config.codec,
            width: config.width,
            height: config.height,
            bitrate_bps: config.start_bitrate_bps,
            framerate: config.max_framerate as f64,
        };
        self.backend.configure(&settings)?;
        self.settings = Some(settings);
        self.pending_rates = None;
        tracing::info!(
            "[HardwareEncoder] {} initialised at {}x{} {} bps",
            self.kind,
            config.width,
            config.height,
            config.start_bitrate_bps
        );
        Ok(())
    }

    fn register_encode_complete_callback(&mut self, callback: Option<EncodeCompleteCallback>) {
        *self.callback.lock() = callback;
    }

    fn encode(&mut self, frame: &VideoFrame, frame_types: &[VideoFrameType]) -> Result<()> {
        let Some(mut settings) = self.settings else {
            tracing::warn!("[HardwareEncoder] Encode called before init, ignoring frame");
            return Ok(());
        };

        let Some(input) = self.select_input(frame)? else {
            return Ok(());
        };

        let mut reconfigure = false;
        if let Some(rates) = self.pending_rates.take() {
            settings.bitrate_bps = rates.bitrate_bps;
            settings.framerate = rates.framerate_fps;
            reconfigure = true;
        }
        if input.width() != settings.width || input.height() != settings.height {
            tracing::debug!(
                "[HardwareEncoder] Frame size {}x{} differs from {}x{}, reconfiguring",
                input.width(),
                input.height(),
                settings.width,
                settings.height
            );
            settings.width = input.width();
            settings.height = input.height();
            reconfigure = true;
        }
        if reconfigure {
            self.backend.configure(&settings)?;
            self.settings = Some(settings);
        }

        let encode_start_ms = now_ms();
        let packets = self.backend.encode(&input, wants_key_frame(frame_types))?;
        let encode_finish_ms = now_ms();

        for packet in packets {
            let image = EncodedImage {
                width: settings.width,
                height: settings.height,
                rtp_timestamp: frame.rtp_timestamp(),
                capture_time_ms: frame.timestamp_us / 1000,
                encode_start_ms,
                encode_finish_ms,
                frame_type: if packet.key_frame {
                    VideoFrameType::Key
                } else {
                    VideoFrameType::Delta
                },
                spatial_index: self.spatial_index,
                qp: packet.qp,
                data: packet.data,
            };
            let info = CodecSpecificInfo::for_codec(settings.codec, packet.key_frame);

            if let Some(stats) = &self.stats {
                let bitrate_mbps = image.data.len() as f64 * 8.0 * settings.framerate / 1_000_000.0;
                stats.set_encoder_stats(image.encode_duration_ms() as f64, bitrate_mbps, image.qp);
            }
            self.emit(&image, &info);
        }
        Ok(())
    }

    fn set_rates(&mut self, parameters: RateControlParameters) {
        if parameters.bitrate_bps == 0 || parameters.framerate_fps <= 0.0 {
            tracing::warn!("[HardwareEncoder] Ignoring invalid rates {:?}", parameters);
            return;
        }
        self.pending_rates = Some(parameters);
    }

    fn release(&mut self) -> Result<()> {
        *self.callback.lock() = None;
        if self.settings.take().is_some() {
            self.backend.release();
            tracing::info!("[HardwareEncoder] {} released", self.kind);
        }
        Ok(())
    }

    fn encoder_info(&self) -> EncoderInfo {
        EncoderInfo {
            implementation_name: format!("MILLICAST_HW_ENCODER_{}", self.kind.name()),
            supports_native_handle: true,
            is_hardware_accelerated: true,
        }
    }
}

impl Drop for HardwareVideoEncoder {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
