// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Video codec types and SDP formats.

use crate::core::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Codec selected for the published video track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodecKind {
    #[default]
    Vp8,
    Vp9,
    H264,
}

impl VideoCodecKind {
    /// Name used in the publish command and in SDP format names.
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodecKind::Vp8 => "vp8",
            VideoCodecKind::Vp9 => "vp9",
            VideoCodecKind::H264 => "h264",
        }
    }

    /// MIME type registered with the media engine.
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodecKind::Vp8 => webrtc::api::media_engine::MIME_TYPE_VP8,
            VideoCodecKind::Vp9 => webrtc::api::media_engine::MIME_TYPE_VP9,
            VideoCodecKind::H264 => webrtc::api::media_engine::MIME_TYPE_H264,
        }
    }

    /// RTP payload type registered with the media engine (96-127 for dynamic types).
    pub fn rtp_payload_type(&self) -> u8 {
        match self {
            VideoCodecKind::Vp8 => 96,
            VideoCodecKind::Vp9 => 98,
            VideoCodecKind::H264 => 102,
        }
    }

    /// SDP format-specific parameters (fmtp line) for the registered payload type.
    pub fn sdp_fmtp_line(&self) -> String {
        match self {
            VideoCodecKind::Vp8 => String::new(),
            VideoCodecKind::Vp9 => "profile-id=0".to_owned(),
            VideoCodecKind::H264 => SdpVideoFormat::h264(H264Profile::ConstrainedBaseline, H264Level::L3_1)
                .fmtp_line(),
        }
    }

    /// VP9 carries its own spatial layers and is never published as simulcast.
    pub fn supports_simulcast(&self) -> bool {
        !matches!(self, VideoCodecKind::Vp9)
    }
}

impl fmt::Display for VideoCodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoCodecKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vp8" => Ok(VideoCodecKind::Vp8),
            "vp9" => Ok(VideoCodecKind::Vp9),
            "h264" => Ok(VideoCodecKind::H264),
            other => Err(StreamError::Configuration(format!(
                "Unknown video codec '{}' (expected vp8, vp9 or h264)",
                other
            ))),
        }
    }
}

/// H.264 encoding profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H264Profile {
    /// Baseline with constraint_set1 - what browsers negotiate by default.
    ConstrainedBaseline,
    Baseline,
    Main,
    High,
}

impl H264Profile {
    /// profile_idc and constraint flags as two hex bytes.
    fn profile_iop(&self) -> &'static str {
        match self {
            H264Profile::ConstrainedBaseline => "42e0",
            H264Profile::Baseline => "4200",
            H264Profile::Main => "4d00",
            H264Profile::High => "6400",
        }
    }
}

/// H.264 level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H264Level {
    L1,
    L3_1,
    L4_1,
}

impl H264Level {
    fn level_idc(&self) -> u8 {
        match self {
            H264Level::L1 => 10,
            H264Level::L3_1 => 31,
            H264Level::L4_1 => 41,
        }
    }
}

/// An encoder format as advertised to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpVideoFormat {
    pub codec: VideoCodecKind,
    pub parameters: Vec<(String, String)>,
}

impl SdpVideoFormat {
    pub fn new(codec: VideoCodecKind) -> Self {
        Self {
            codec,
            parameters: Vec::new(),
        }
    }

    pub fn h264(profile: H264Profile, level: H264Level) -> Self {
        Self {
            codec: VideoCodecKind::H264,
            parameters: vec![
                ("level-asymmetry-allowed".to_owned(), "1".to_owned()),
                ("packetization-mode".to_owned(), "1".to_owned()),
                (
                    "profile-level-id".to_owned(),
                    format!("{}{:02x}", profile.profile_iop(), level.level_idc()),
                ),
            ],
        }
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fmtp_line(&self) -> String {
        self.parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }
}
