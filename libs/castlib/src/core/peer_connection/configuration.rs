// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Settings fixed at peer-connection creation time.

use crate::core::codec::VideoCodecKind;
use crate::core::config::BitrateSettings;
use crate::core::signaling::IceServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpSemantics {
    UnifiedPlan,
    PlanB,
}

/// Configuration handed to the engine when a peer connection is built.
/// Changing it afterwards only affects the next session.
#[derive(Debug, Clone)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub bitrates: BitrateSettings,
    pub sdp_semantics: SdpSemantics,
    pub cpu_adaptation: bool,
    pub combined_audio_video_bwe: bool,
    pub video_codec: VideoCodecKind,
    pub simulcast: bool,
}

impl Default for RtcConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            bitrates: BitrateSettings::default(),
            sdp_semantics: SdpSemantics::UnifiedPlan,
            cpu_adaptation: false,
            combined_audio_video_bwe: true,
            video_codec: VideoCodecKind::default(),
            simulcast: false,
        }
    }
}

impl RtcConfiguration {
    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServer>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    pub fn with_bitrates(mut self, bitrates: BitrateSettings) -> Self {
        self.bitrates = bitrates;
        self
    }

    pub fn with_video_codec(mut self, codec: VideoCodecKind) -> Self {
        self.video_codec = codec;
        self
    }

    /// Ignored for codecs that cannot be simulcast.
    pub fn with_simulcast(mut self, enabled: bool) -> Self {
        self.simulcast = enabled;
        self
    }

    pub fn simulcast_enabled(&self) -> bool {
        self.simulcast && self.video_codec.supports_simulcast()
    }

    pub fn video_encodings(&self) -> Vec<RtpEncoding> {
        video_encodings(&self.bitrates, self.simulcast_enabled())
    }
}

/// One outgoing RTP stream of the video transceiver.
#[derive(Debug, Clone, PartialEq)]
pub struct RtpEncoding {
    pub rid: Option<String>,
    pub min_bitrate_bps: Option<u32>,
    pub max_bitrate_bps: u32,
    pub scale_resolution_down_by: f64,
    pub max_framerate: Option<f64>,
    pub active: bool,
}

impl RtpEncoding {
    fn layer(rid: &str, max_bitrate_bps: u32, scale: f64) -> Self {
        Self {
            rid: Some(rid.to_owned()),
            min_bitrate_bps: None,
            max_bitrate_bps,
            scale_resolution_down_by: scale,
            max_framerate: None,
            active: true,
        }
    }
}

pub const SIMULCAST_RIDS: [&str; 3] = ["h", "m", "l"];

/// Simulcast gives `h`/`m`/`l` at full, half and quarter bitrate and
/// resolution. Otherwise a single 60 fps encoding bounded by min/max.
pub fn video_encodings(bitrates: &BitrateSettings, simulcast: bool) -> Vec<RtpEncoding> {
    if simulcast {
        return SIMULCAST_RIDS
            .iter()
            .enumerate()
            .map(|(i, rid)| {
                let divisor = 1u32 << i;
                RtpEncoding::layer(rid, bitrates.max_bps / divisor, f64::from(divisor))
            })
            .collect();
    }

    vec![RtpEncoding {
        rid: None,
        min_bitrate_bps: Some(bitrates.min_bps),
        max_bitrate_bps: bitrates.max_bps,
        scale_resolution_down_by: 1.0,
        max_framerate: Some(60.0),
        active: true,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulcast_encodings() {
        let encodings = video_encodings(&BitrateSettings::default(), true);
        let summary: Vec<_> = encodings
            .iter()
            .map(|e| (e.rid.as_deref().unwrap(), e.max_bitrate_bps, e.scale_resolution_down_by))
            .collect();
        assert_eq!(
            summary,
            vec![("h", 4_000_000, 1.0), ("m", 2_000_000, 2.0), ("l", 1_000_000, 4.0)]
        );
    }

    #[test]
    fn test_single_encoding() {
        let encodings = video_encodings(&BitrateSettings::default(), false);
        assert_eq!(encodings.len(), 1);
        assert_eq!(encodings[0].min_bitrate_bps, Some(1_000_000));
        assert_eq!(encodings[0].max_framerate, Some(60.0));
        assert!(encodings[0].rid.is_none());
    }

    #[test]
    fn test_vp9_never_simulcast() {
        let config = RtcConfiguration::default()
            .with_video_codec(VideoCodecKind::Vp9)
            .with_simulcast(true);
        assert!(!config.simulcast_enabled());
        assert_eq!(config.video_encodings().len(), 1);
        assert_eq!(config.sdp_semantics, SdpSemantics::UnifiedPlan);
        assert!(!config.cpu_adaptation);
    }
}
