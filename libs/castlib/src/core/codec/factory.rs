// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Encoder selection: hardware first, then registered software providers.

use super::encoder::VideoEncoder;
use super::hardware::{HardwareEncoderRegistry, HardwareVideoEncoder};
use super::software::{SoftwareEncoderProvider, SoftwareVideoEncoder};
use super::video_codec::{H264Level, H264Profile, SdpVideoFormat, VideoCodecKind};
use crate::core::stats::PublisherStats;
use crate::core::video::GpuDescriptor;
use crate::core::{Result, StreamError};
use std::sync::Arc;

/// Formats advertised to the engine, in preference order.
pub fn supported_formats() -> Vec<SdpVideoFormat> {
    vec![
        SdpVideoFormat::h264(H264Profile::Main, H264Level::L1),
        SdpVideoFormat::h264(H264Profile::ConstrainedBaseline, H264Level::L3_1),
        SdpVideoFormat::h264(H264Profile::Baseline, H264Level::L3_1),
        SdpVideoFormat::new(VideoCodecKind::Vp8),
        SdpVideoFormat::new(VideoCodecKind::Vp9),
    ]
}

#[derive(Clone)]
pub struct VideoEncoderFactory {
    gpu: GpuDescriptor,
    hardware: Arc<HardwareEncoderRegistry>,
    software: Vec<Arc<dyn SoftwareEncoderProvider>>,
    stats: Option<Arc<PublisherStats>>,
}

impl VideoEncoderFactory {
    pub fn new(gpu: GpuDescriptor, hardware: Arc<HardwareEncoderRegistry>) -> Self {
        Self {
            gpu,
            hardware,
            software: Vec::new(),
            stats: None,
        }
    }

    pub fn with_software_provider(mut self, provider: Arc<dyn SoftwareEncoderProvider>) -> Self {
        self.software.push(provider);
        self
    }

    pub fn with_stats(mut self, stats: Arc<PublisherStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn supported_formats(&self) -> Vec<SdpVideoFormat> {
        supported_formats()
    }

    /// True when some encoder, hardware or software, handles `codec`.
    pub fn can_encode(&self, codec: VideoCodecKind) -> bool {
        let format = preferred_format(codec);
        self.hardware.supports(&self.gpu, codec) || self.software.iter().any(|p| p.supports(&format))
    }

    pub fn create_encoder(&self, format: &SdpVideoFormat) -> Result<Box<dyn VideoEncoder>> {
        self.create(format, None)
    }

    /// Encoder for one simulcast layer; it picks `layer` out of simulcast frames.
    pub fn create_layer_encoder(&self, format: &SdpVideoFormat, layer: usize) -> Result<Box<dyn VideoEncoder>> {
        self.create(format, Some(layer))
    }

    fn create(&self, format: &SdpVideoFormat, layer: Option<usize>) -> Result<Box<dyn VideoEncoder>> {
        if self.hardware.supports(&self.gpu, format.codec) {
            let backend = self.hardware.create(&self.gpu, format.codec)?;
            let mut encoder = HardwareVideoEncoder::new(backend);
            if let Some(layer) = layer {
                encoder = encoder.with_spatial_index(layer);
            }
            if let Some(stats) = &self.stats {
                encoder = encoder.with_stats(Arc::clone(stats));
            }
            tracing::info!("[EncoderFactory] Using hardware {} encoder", format.codec);
            return Ok(Box::new(encoder));
        }

        let provider = self
            .software
            .iter()
            .find(|p| p.supports(format))
            .ok_or_else(|| {
                StreamError::Resource(format!("No encoder available for {}", format.codec))
            })?;
        let mut encoder = SoftwareVideoEncoder::new(provider.create(format)?);
        if let Some(layer) = layer {
            encoder = encoder.with_spatial_index(layer);
        }
        tracing::info!(
            "[EncoderFactory] Using software {} encoder ({})",
            format.codec,
            provider.name()
        );
        Ok(Box::new(encoder))
    }
}

/// The format used when only the codec is known.
pub fn preferred_format(codec: VideoCodecKind) -> SdpVideoFormat {
    match codec {
        VideoCodecKind::H264 => SdpVideoFormat::h264(H264Profile::ConstrainedBaseline, H264Level::L3_1),
        other => SdpVideoFormat::new(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::hardware::testing::{RecordingBackend, RecordingProvider};
    use crate::core::codec::software::testing::{FakeProvider, FakeSoftwareEncoder};

    #[test]
    fn test_supported_format_order() {
        let formats = supported_formats();
        let ids: Vec<_> = formats
            .iter()
            .map(|f| f.parameter("profile-level-id").unwrap_or(f.codec.as_str()).to_owned())
            .collect();
        assert_eq!(ids, vec!["4d000a", "42e01f", "42001f", "vp8", "vp9"]);
    }

    #[test]
    fn test_hardware_preferred_over_software() {
        let registry = Arc::new(HardwareEncoderRegistry::new());
        registry.register(Arc::new(RecordingProvider(RecordingBackend::default())));
        let factory = VideoEncoderFactory::new(GpuDescriptor::cpu(), registry)
            .with_software_provider(Arc::new(FakeProvider(FakeSoftwareEncoder::default())));

        let h264 = factory.create_encoder(&preferred_format(VideoCodecKind::H264)).unwrap();
        assert!(h264.encoder_info().is_hardware_accelerated);

        let vp8 = factory.create_encoder(&preferred_format(VideoCodecKind::Vp8)).unwrap();
        assert!(!vp8.encoder_info().is_hardware_accelerated);
    }

    #[test]
    fn test_no_encoder_is_resource_error() {
        let factory = VideoEncoderFactory::new(GpuDescriptor::cpu(), Arc::new(HardwareEncoderRegistry::new()));
        assert!(!factory.can_encode(VideoCodecKind::Vp9));
        let err = factory
            .create_encoder(&preferred_format(VideoCodecKind::Vp9))
            .err()
            .unwrap();
        assert_eq!(err.category(), crate::core::ErrorCategory::Resource);
    }
}
