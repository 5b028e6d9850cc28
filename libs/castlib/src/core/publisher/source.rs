// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The media-source descriptor together with its capture sources.

use crate::core::audio::{AudioSource, AudioTransport};
use crate::core::config::PublisherConfig;
use crate::core::signaling::PublishCredentials;
use crate::core::streaming::{AudioTrack, VideoTrack};
use crate::core::video::{Texture, VideoSource};
use crate::core::{Result, StreamError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Tracks produced by a started source.
#[derive(Clone, Default)]
pub struct CapturedTracks {
    pub video: Option<VideoTrack>,
    pub audio: Option<AudioTrack>,
}

pub struct PublisherSource {
    config: PublisherConfig,
    video: Option<Arc<Mutex<dyn VideoSource>>>,
    audio: Option<Arc<AudioSource>>,
    tracks: Option<CapturedTracks>,
}

impl PublisherSource {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            config,
            video: None,
            audio: None,
            tracks: None,
        }
    }

    /// The host keeps its own handle to drive frames into the source.
    pub fn with_video_source(mut self, source: Arc<Mutex<dyn VideoSource>>) -> Self {
        self.video = Some(source);
        self
    }

    pub fn with_audio_source(mut self, source: Arc<AudioSource>) -> Self {
        self.audio = Some(source);
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub(crate) fn config_mut(&mut self) -> &mut PublisherConfig {
        &mut self.config
    }

    /// Audio source fed by the host; created on first capture when absent.
    pub fn audio_source(&self) -> Option<Arc<AudioSource>> {
        self.audio.clone()
    }

    pub fn credentials(&self) -> PublishCredentials {
        PublishCredentials::new(
            self.config.stream_name.clone(),
            self.config.publishing_token.clone(),
            self.config.stream_url.clone(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;
        if self.config.capture_video && self.video.is_none() {
            return Err(StreamError::Configuration(
                "Video capture is enabled but no video source is set".into(),
            ));
        }
        if !self.config.capture_video && !self.config.capture_audio {
            return Err(StreamError::Configuration("Nothing to capture".into()));
        }
        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.tracks.is_some()
    }

    pub fn tracks(&self) -> Option<CapturedTracks> {
        self.tracks.clone()
    }

    /// Starts every enabled source. A second call warns and returns the
    /// tracks of the first.
    pub fn start_capture(&mut self, transport: &AudioTransport) -> Result<CapturedTracks> {
        if let Some(tracks) = &self.tracks {
            tracing::warn!("[PublisherSource] Capture already started");
            return Ok(tracks.clone());
        }

        let simulcast = self.config.simulcast && self.config.video_codec.supports_simulcast();
        let video = match (&self.video, self.config.capture_video) {
            (Some(source), true) => {
                let mut source = source.lock();
                source.set_simulcast(simulcast);
                Some(source.start_capture()?)
            }
            _ => None,
        };

        let audio = if self.config.capture_audio {
            let config = &self.config.audio;
            let source = self
                .audio
                .get_or_insert_with(|| Arc::new(AudioSource::new(config)));
            Some(source.start_capture(transport))
        } else {
            None
        };

        let tracks = CapturedTracks { video, audio };
        self.tracks = Some(tracks.clone());
        tracing::info!(
            "[PublisherSource] Capture started (video: {}, audio: {})",
            tracks.video.is_some(),
            tracks.audio.is_some()
        );
        Ok(tracks)
    }

    pub fn stop_capture(&mut self) {
        if self.tracks.take().is_none() {
            tracing::warn!("[PublisherSource] Capture is not running");
            return;
        }
        if let Some(video) = &self.video {
            video.lock().stop_capture();
        }
        if let Some(audio) = &self.audio {
            audio.stop_capture();
        }
        tracing::info!("[PublisherSource] Capture stopped");
    }

    /// A muted video track carries black frames.
    pub fn mute_video(&self, muted: bool) {
        match self.tracks.as_ref().and_then(|t| t.video.as_ref()) {
            Some(track) => {
                track.set_enabled(!muted);
                tracing::info!("[PublisherSource] Video {}", if muted { "muted" } else { "unmuted" });
            }
            None => tracing::warn!("[PublisherSource] No video track to mute"),
        }
    }

    pub fn is_video_muted(&self) -> bool {
        self.tracks
            .as_ref()
            .and_then(|t| t.video.as_ref())
            .is_some_and(|track| !track.enabled())
    }

    pub fn mute_audio(&self, muted: bool) {
        match self.tracks.as_ref().and_then(|t| t.audio.as_ref()) {
            Some(track) => {
                track.set_enabled(!muted);
                tracing::info!("[PublisherSource] Audio {}", if muted { "muted" } else { "unmuted" });
            }
            None => tracing::warn!("[PublisherSource] No audio track to mute"),
        }
    }

    pub fn set_volume_multiplier(&mut self, db: f32) {
        self.config.audio.volume_multiplier_db = db;
        if let Some(audio) = &self.audio {
            audio.set_volume_multiplier(db);
        }
    }

    pub fn change_render_target(&self, target: Arc<dyn Texture>) -> Result<()> {
        match &self.video {
            Some(source) => source.lock().change_render_target(target),
            None => Err(StreamError::InvalidState("No video source set".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::{
        CpuDevice, CpuTexture, RenderTargetCapturer, TextureDescriptor, VideoCaptureSettings,
        ViewportCapturer,
    };

    fn viewport() -> Arc<Mutex<dyn VideoSource>> {
        let settings = VideoCaptureSettings::new(Arc::new(CpuDevice::new()), 64, 64);
        Arc::new(Mutex::new(ViewportCapturer::new(settings)))
    }

    #[test]
    fn test_validate() {
        let source = PublisherSource::new(PublisherConfig::new("", "token"));
        assert!(source.validate().is_err());

        let source = PublisherSource::new(PublisherConfig::new("stream", "token"));
        assert!(source.validate().is_err(), "video enabled without a source");

        let source = PublisherSource::new(PublisherConfig::new("stream", "token"))
            .with_video_source(viewport());
        assert!(source.validate().is_ok());

        let source = PublisherSource::new(
            PublisherConfig::new("stream", "token").with_capture(false, true),
        );
        assert!(source.validate().is_ok());
    }

    #[test]
    fn test_start_stop_and_mute() {
        let transport = AudioTransport::new();
        let mut source = PublisherSource::new(PublisherConfig::new("stream", "token"))
            .with_video_source(viewport());

        let tracks = source.start_capture(&transport).unwrap();
        let again = source.start_capture(&transport).unwrap();
        assert!(tracks.video.as_ref().unwrap().ptr_eq(again.video.as_ref().unwrap()));
        assert!(source.audio_source().unwrap().is_capturing());

        source.mute_video(true);
        assert!(source.is_video_muted());
        source.mute_video(false);
        assert!(!source.is_video_muted());
        source.mute_audio(true);
        assert!(!tracks.audio.as_ref().unwrap().enabled());

        source.stop_capture();
        source.stop_capture();
        assert!(!source.is_capturing());
        assert!(!source.audio_source().unwrap().is_capturing());
    }

    #[test]
    fn test_change_render_target() {
        let settings = VideoCaptureSettings::new(Arc::new(CpuDevice::new()), 64, 64);
        let target: Arc<dyn Texture> = Arc::new(CpuTexture::new(TextureDescriptor::new(64, 64)));
        let capturer = Arc::new(Mutex::new(RenderTargetCapturer::new(settings, Arc::clone(&target))));
        let source = PublisherSource::new(PublisherConfig::new("s", "t")).with_video_source(capturer);
        assert!(source.change_render_target(Arc::clone(&target)).is_ok());

        let source = PublisherSource::new(PublisherConfig::new("s", "t")).with_video_source(viewport());
        assert!(matches!(
            source.change_render_target(target),
            Err(StreamError::NotSupported(_))
        ));
    }

    #[test]
    fn test_volume_multiplier_reaches_audio_source() {
        let transport = AudioTransport::new();
        let mut source = PublisherSource::new(
            PublisherConfig::new("stream", "token").with_capture(false, true),
        );
        source.start_capture(&transport).unwrap();
        source.set_volume_multiplier(20.0);
        assert!((source.audio_source().unwrap().gain() - 10.0).abs() < 1e-4);
    }
}
