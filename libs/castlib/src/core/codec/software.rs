// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Software encoder pass-through and providers.

use super::encoder::{
    EncodeCompleteCallback, EncoderInfo, RateControlParameters, VideoEncoder, VideoEncoderConfig,
    VideoFrameType,
};
use super::video_codec::SdpVideoFormat;
use crate::core::video::{VideoFrame, VideoFrameBuffer};
use crate::core::Result;

/// Source of software encoders for a set of formats.
pub trait SoftwareEncoderProvider: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, format: &SdpVideoFormat) -> bool;

    fn create(&self, format: &SdpVideoFormat) -> Result<Box<dyn VideoEncoder>>;
}

/// Wraps a software encoder, converting native input to I420 first.
pub struct SoftwareVideoEncoder {
    inner: Box<dyn VideoEncoder>,
    spatial_index: Option<usize>,
}

impl SoftwareVideoEncoder {
    pub fn new(inner: Box<dyn VideoEncoder>) -> Self {
        Self {
            inner,
            spatial_index: None,
        }
    }

    /// Encode only this layer of simulcast input.
    pub fn with_spatial_index(mut self, index: usize) -> Self {
        self.spatial_index = Some(index);
        self
    }
}

impl VideoEncoder for SoftwareVideoEncoder {
    fn init_encode(&mut self, config: &VideoEncoderConfig) -> Result<()> {
        self.inner.init_encode(config)
    }

    fn register_encode_complete_callback(&mut self, callback: Option<EncodeCompleteCallback>) {
        self.inner.register_encode_complete_callback(callback)
    }

    fn encode(&mut self, frame: &VideoFrame, frame_types: &[VideoFrameType]) -> Result<()> {
        let layer = frame
            .buffer
            .layer(self.spatial_index.unwrap_or(0))
            .unwrap_or_else(|| frame.buffer.clone());
        let planar = match layer {
            VideoFrameBuffer::I420(_) => layer,
            native => VideoFrameBuffer::I420(native.to_i420()?),
        };
        self.inner
            .encode(&VideoFrame::new(planar, frame.timestamp_us), frame_types)
    }

    fn set_rates(&mut self, parameters: RateControlParameters) {
        self.inner.set_rates(parameters)
    }

    fn release(&mut self) -> Result<()> {
        self.inner.release()
    }

    fn encoder_info(&self) -> EncoderInfo {
        let mut info = self.inner.encoder_info();
        info.supports_native_handle = false;
        info
    }
}

#[cfg(feature = "openh264")]
pub use openh264_encoder::{OpenH264Encoder, OpenH264Provider};

#[cfg(feature = "openh264")]
mod openh264_encoder {
    use super::*;
    use crate::core::codec::encoder::{
        now_ms, wants_key_frame, CodecSpecificInfo, EncodedImage,
    };
    use crate::core::codec::VideoCodecKind;
    use crate::core::StreamError;
    use openh264::encoder::{Encoder, FrameType};
    use openh264::formats::YUVBuffer;

    /// H.264 software encoder backed by openh264.
    pub struct OpenH264Encoder {
        encoder: Option<Encoder>,
        config: Option<VideoEncoderConfig>,
        callback: Option<EncodeCompleteCallback>,
    }

    impl OpenH264Encoder {
        pub fn new() -> Self {
            Self {
                encoder: None,
                config: None,
                callback: None,
            }
        }
    }

    impl Default for OpenH264Encoder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl VideoEncoder for OpenH264Encoder {
        fn init_encode(&mut self, config: &VideoEncoderConfig) -> Result<()> {
            let encoder = Encoder::new()
                .map_err(|e| StreamError::Resource(format!("Failed to create H.264 encoder: {}", e)))?;
            self.encoder = Some(encoder);
            self.config = Some(config.clone());
            tracing::info!("[OpenH264] Initialised at {}x{}", config.width, config.height);
            Ok(())
        }

        fn register_encode_complete_callback(&mut self, callback: Option<EncodeCompleteCallback>) {
            self.callback = callback;
        }

        fn encode(&mut self, frame: &VideoFrame, frame_types: &[VideoFrameType]) -> Result<()> {
            let Some(encoder) = self.encoder.as_mut() else {
                tracing::warn!("[OpenH264] Encode called before init, ignoring frame");
                return Ok(());
            };
            let i420 = frame.buffer.to_i420()?;
            if i420.width() % 2 != 0 || i420.height() % 2 != 0 {
                return Err(StreamError::NotSupported(format!(
                    "H.264 needs even dimensions, got {}x{}",
                    i420.width(),
                    i420.height()
                )));
            }

            if wants_key_frame(frame_types) {
                encoder.force_intra_frame();
            }
            let yuv = YUVBuffer::from_vec(
                i420.to_contiguous(),
                i420.width() as usize,
                i420.height() as usize,
            );

            let encode_start_ms = now_ms();
            let bitstream = encoder
                .encode(&yuv)
                .map_err(|e| StreamError::Runtime(format!("H.264 encoding failed: {}", e)))?;
            let key_frame = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
            let data = bitstream.to_vec();
            let encode_finish_ms = now_ms();

            if data.is_empty() {
                return Ok(());
            }

            let image = EncodedImage {
                data,
                width: i420.width(),
                height: i420.height(),
                rtp_timestamp: frame.rtp_timestamp(),
                capture_time_ms: frame.timestamp_us / 1000,
                encode_start_ms,
                encode_finish_ms,
                frame_type: if key_frame {
                    VideoFrameType::Key
                } else {
                    VideoFrameType::Delta
                },
                spatial_index: None,
                qp: -1,
            };
            if let Some(callback) = &self.callback {
                callback(&image, &CodecSpecificInfo::for_codec(VideoCodecKind::H264, key_frame));
            }
            Ok(())
        }

        fn set_rates(&mut self, parameters: RateControlParameters) {
            // openh264 0.9 does not expose runtime rate control.
            tracing::debug!("[OpenH264] Rate update {:?} not applied", parameters);
        }

        fn release(&mut self) -> Result<()> {
            self.encoder = None;
            self.config = None;
            self.callback = None;
            Ok(())
        }

        fn encoder_info(&self) -> EncoderInfo {
            EncoderInfo {
                implementation_name: "OpenH264".into(),
                supports_native_handle: false,
                is_hardware_accelerated: false,
            }
        }
    }

    pub struct OpenH264Provider;

    impl SoftwareEncoderProvider for OpenH264Provider {
        fn name(&self) -> &str {
            "openh264"
        }

        fn supports(&self, format: &SdpVideoFormat) -> bool {
            format.codec == VideoCodecKind::H264
        }

        fn create(&self, _format: &SdpVideoFormat) -> Result<Box<dyn VideoEncoder>> {
            Ok(Box::new(OpenH264Encoder::new()))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSoftwareEncoder;
    use super::*;
    use crate::core::video::{
        CpuDevice, CpuTexture, EncoderContext, GpuDevice, I420Buffer, NativeFrameBuffer,
        TextureDescriptor,
    };
    use std::sync::Arc;

    #[test]
    fn test_native_input_converted_to_i420() {
        let gpu: Arc<dyn GpuDevice> = Arc::new(CpuDevice::new());
        let ctx = EncoderContext::new(gpu, 32, 16, false).unwrap();
        let input = ctx
            .copy_from(&CpuTexture::new(TextureDescriptor::new(32, 16)), 0)
            .unwrap();
        let native = Arc::new(NativeFrameBuffer::new(input));
        let frame = VideoFrame::new(VideoFrameBuffer::Native(Arc::clone(&native)), 0);

        let fake = FakeSoftwareEncoder::default();
        let mut encoder = SoftwareVideoEncoder::new(Box::new(fake.clone()));
        encoder.encode(&frame, &[]).unwrap();

        assert_eq!(fake.seen.lock()[0], (32, 16, true));
        assert!(native.has_i420());
    }

    #[test]
    fn test_i420_passes_through() {
        let fake = FakeSoftwareEncoder::default();
        let mut encoder = SoftwareVideoEncoder::new(Box::new(fake.clone()));
        let frame = VideoFrame::new(VideoFrameBuffer::I420(Arc::new(I420Buffer::black(8, 8))), 0);
        encoder.encode(&frame, &[]).unwrap();
        assert_eq!(fake.seen.lock()[0], (8, 8, true));
        assert!(!encoder.encoder_info().supports_native_handle);
    }
}
