// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Media-source descriptor loaded from `castlib.yaml`.

use crate::core::codec::VideoCodecKind;
use crate::core::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Director endpoint used when no stream URL is configured.
pub const DEFAULT_STREAM_URL: &str = "https://director.millicast.com/api/director/publish";

/// Bitrate bounds handed to the peer connection before it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitrateSettings {
    pub min_bps: u32,
    pub start_bps: u32,
    pub max_bps: u32,
}

impl Default for BitrateSettings {
    fn default() -> Self {
        Self {
            min_bps: 1_000_000,
            start_bps: 2_000_000,
            max_bps: 4_000_000,
        }
    }
}

impl BitrateSettings {
    pub fn new(min_bps: u32, start_bps: u32, max_bps: u32) -> Self {
        Self {
            min_bps,
            start_bps,
            max_bps,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_bps > self.max_bps {
            return Err(StreamError::Configuration(format!(
                "Minimum bitrate {} exceeds maximum bitrate {}",
                self.min_bps, self.max_bps
            )));
        }
        if self.start_bps < self.min_bps || self.start_bps > self.max_bps {
            return Err(StreamError::Configuration(format!(
                "Start bitrate {} outside [{}, {}]",
                self.start_bps, self.min_bps, self.max_bps
            )));
        }
        Ok(())
    }
}

/// Audio capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCaptureConfig {
    /// Rate the capture source delivers samples at.
    pub sample_rate: u32,
    /// Channel count the capture source delivers.
    pub channels: usize,
    /// Gain applied by device capturers, in decibels.
    pub volume_multiplier_db: f32,
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            volume_multiplier_db: 0.0,
        }
    }
}

/// Video capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoCaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Ignore resolution changes from the capture source.
    pub fixed_resolution: bool,
}

impl Default for VideoCaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            fixed_resolution: false,
        }
    }
}

/// Everything a host needs to describe one published stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub stream_name: String,
    pub publishing_token: String,
    pub stream_url: String,
    /// Multi-source identifier, sent with the publish command when set.
    pub source_id: Option<String>,
    pub video_codec: VideoCodecKind,
    pub simulcast: bool,
    pub bitrates: BitrateSettings,
    pub capture_video: bool,
    pub capture_audio: bool,
    /// Mute video while the stream has no viewers.
    pub automute: bool,
    pub audio: AudioCaptureConfig,
    pub video: VideoCaptureConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            publishing_token: String::new(),
            stream_url: DEFAULT_STREAM_URL.to_owned(),
            source_id: None,
            video_codec: VideoCodecKind::default(),
            simulcast: false,
            bitrates: BitrateSettings::default(),
            capture_video: true,
            capture_audio: true,
            automute: true,
            audio: AudioCaptureConfig::default(),
            video: VideoCaptureConfig::default(),
        }
    }
}

impl PublisherConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "castlib.yaml";

    pub fn new(stream_name: impl Into<String>, publishing_token: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            publishing_token: publishing_token.into(),
            ..Default::default()
        }
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = url.into();
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_video_codec(mut self, codec: VideoCodecKind) -> Self {
        self.video_codec = codec;
        self
    }

    pub fn with_simulcast(mut self, enabled: bool) -> Self {
        self.simulcast = enabled;
        self
    }

    pub fn with_bitrates(mut self, bitrates: BitrateSettings) -> Self {
        self.bitrates = bitrates;
        self
    }

    pub fn with_automute(mut self, enabled: bool) -> Self {
        self.automute = enabled;
        self
    }

    pub fn with_capture(mut self, video: bool, audio: bool) -> Self {
        self.capture_video = video;
        self.capture_audio = audio;
        self
    }

    /// Stream name and publishing token must both be set.
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(StreamError::Configuration("Stream name is empty".into()));
        }
        if self.publishing_token.is_empty() {
            return Err(StreamError::Configuration("Publishing token is empty".into()));
        }
        self.bitrates.validate()
    }

    /// Load from an explicit YAML file.
    pub fn from_file(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path).map_err(|e| {
            StreamError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            StreamError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;

        tracing::info!("Loaded publisher config from {}", config_path.display());
        Ok(config)
    }

    /// Load `castlib.yaml` from a directory. Returns error if the file is
    /// missing or cannot be parsed.
    pub fn load(project_path: &Path) -> Result<Self> {
        Self::from_file(&project_path.join(Self::FILE_NAME))
    }

    /// Load `castlib.yaml` from a directory, returning defaults if the file
    /// is missing or unparseable.
    pub fn load_or_default(project_path: &Path) -> Self {
        let config_path = project_path.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                project_path.display()
            );
            return Self::default();
        }

        match Self::from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }
}
