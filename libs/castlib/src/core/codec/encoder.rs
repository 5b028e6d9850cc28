// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Encoder contract shared by hardware, software and simulcast encoders.

use super::VideoCodecKind;
use crate::core::video::VideoFrame;
use crate::core::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Key,
    Delta,
}

/// Settings passed to [`VideoEncoder::init_encode`].
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub codec: VideoCodecKind,
    pub width: u32,
    pub height: u32,
    pub min_bitrate_bps: u32,
    pub start_bitrate_bps: u32,
    pub max_bitrate_bps: u32,
    pub max_framerate: u32,
    /// Number of simulcast layers; 1 means a single stream.
    pub simulcast_layers: usize,
}

impl VideoEncoderConfig {
    pub fn new(codec: VideoCodecKind, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            min_bitrate_bps: 1_000_000,
            start_bitrate_bps: 2_000_000,
            max_bitrate_bps: 4_000_000,
            max_framerate: 60,
            simulcast_layers: 1,
        }
    }

    pub fn with_bitrates(mut self, min_bps: u32, start_bps: u32, max_bps: u32) -> Self {
        self.min_bitrate_bps = min_bps;
        self.start_bitrate_bps = start_bps;
        self.max_bitrate_bps = max_bps;
        self
    }

    pub fn with_max_framerate(mut self, fps: u32) -> Self {
        self.max_framerate = fps;
        self
    }

    pub fn with_simulcast_layers(mut self, layers: usize) -> Self {
        self.simulcast_layers = layers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateControlParameters {
    pub bitrate_bps: u32,
    pub framerate_fps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264PacketizationMode {
    SingleNalUnit,
    NonInterleaved,
}

/// Codec-specific metadata attached to each encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecSpecificInfo {
    H264 {
        packetization_mode: H264PacketizationMode,
        idr_frame: bool,
    },
    Vp8 {
        key_frame: bool,
    },
    Vp9 {
        key_frame: bool,
    },
}

impl CodecSpecificInfo {
    pub fn for_codec(codec: VideoCodecKind, key_frame: bool) -> Self {
        match codec {
            VideoCodecKind::H264 => CodecSpecificInfo::H264 {
                packetization_mode: H264PacketizationMode::NonInterleaved,
                idr_frame: key_frame,
            },
            VideoCodecKind::Vp8 => CodecSpecificInfo::Vp8 { key_frame },
            VideoCodecKind::Vp9 => CodecSpecificInfo::Vp9 { key_frame },
        }
    }
}

/// One compressed frame with its timing.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub rtp_timestamp: u32,
    pub capture_time_ms: i64,
    pub encode_start_ms: i64,
    pub encode_finish_ms: i64,
    pub frame_type: VideoFrameType,
    pub spatial_index: Option<usize>,
    /// Quantizer of the frame, -1 when unknown.
    pub qp: i32,
}

impl EncodedImage {
    pub fn is_key_frame(&self) -> bool {
        self.frame_type == VideoFrameType::Key
    }

    pub fn encode_duration_ms(&self) -> i64 {
        self.encode_finish_ms - self.encode_start_ms
    }
}

/// Receives every encoded image an encoder produces.
pub type EncodeCompleteCallback = Arc<dyn Fn(&EncodedImage, &CodecSpecificInfo) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    pub implementation_name: String,
    pub supports_native_handle: bool,
    pub is_hardware_accelerated: bool,
}

pub trait VideoEncoder: Send {
    fn init_encode(&mut self, config: &VideoEncoderConfig) -> Result<()>;

    fn register_encode_complete_callback(&mut self, callback: Option<EncodeCompleteCallback>);

    /// Encode one frame. A `Key` entry in `frame_types` requests a key frame.
    fn encode(&mut self, frame: &VideoFrame, frame_types: &[VideoFrameType]) -> Result<()>;

    fn set_rates(&mut self, parameters: RateControlParameters);

    fn release(&mut self) -> Result<()>;

    fn encoder_info(&self) -> EncoderInfo;
}

pub(crate) fn wants_key_frame(frame_types: &[VideoFrameType]) -> bool {
    frame_types.contains(&VideoFrameType::Key)
}

/// Milliseconds on the capture clock.
pub(crate) fn now_ms() -> i64 {
    crate::core::video::capture_clock_us() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_info_is_non_interleaved() {
        let info = CodecSpecificInfo::for_codec(VideoCodecKind::H264, true);
        assert_eq!(
            info,
            CodecSpecificInfo::H264 {
                packetization_mode: H264PacketizationMode::NonInterleaved,
                idr_frame: true
            }
        );
    }

    #[test]
    fn test_key_frame_request() {
        assert!(wants_key_frame(&[VideoFrameType::Delta, VideoFrameType::Key]));
        assert!(!wants_key_frame(&[VideoFrameType::Delta]));
        assert!(!wants_key_frame(&[]));
    }
}
