// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Opus encoding of transport audio onto the audio track.

use super::track::{AudioTrack, SampleWriter};
use crate::core::audio::{AudioFrame, AudioTransportCallback, TRANSPORT_CHANNELS, TRANSPORT_SAMPLE_RATE};
use crate::core::{Result, StreamError};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::media::Sample;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioEncoderConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub bitrate_bps: u32,
    pub frame_duration_ms: u32,
    pub vbr: bool,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: TRANSPORT_SAMPLE_RATE,
            channels: TRANSPORT_CHANNELS,
            bitrate_bps: 128_000,
            frame_duration_ms: 20,
            vbr: true,
        }
    }
}

/// Stereo 48 kHz Opus encoder working on `i16` PCM.
pub struct OpusEncoder {
    config: AudioEncoderConfig,
    encoder: opus::Encoder,
    frame_size: usize,
}

impl OpusEncoder {
    pub fn new(config: AudioEncoderConfig) -> Result<Self> {
        if config.sample_rate != TRANSPORT_SAMPLE_RATE {
            return Err(StreamError::Configuration(format!(
                "Opus encoder only supports 48kHz sample rate, got {}Hz",
                config.sample_rate
            )));
        }
        let channels = match config.channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => {
                return Err(StreamError::Configuration(format!(
                    "Opus encoder supports 1 or 2 channels, got {}",
                    n
                )))
            }
        };

        let mut encoder = opus::Encoder::new(config.sample_rate, channels, opus::Application::Audio)
            .map_err(|e| StreamError::Configuration(format!("Failed to create Opus encoder: {:?}", e)))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate_bps as i32))
            .map_err(|e| StreamError::Configuration(format!("Failed to set bitrate: {:?}", e)))?;
        encoder
            .set_vbr(config.vbr)
            .map_err(|e| StreamError::Configuration(format!("Failed to set VBR: {:?}", e)))?;
        encoder
            .set_inband_fec(true)
            .map_err(|e| StreamError::Configuration(format!("Failed to set FEC: {:?}", e)))?;

        let frame_size = (config.sample_rate * config.frame_duration_ms / 1000) as usize;
        tracing::info!(
            "[OpusEncoder] {}Hz, {} channels, {} kbps, {}ms frames",
            config.sample_rate,
            config.channels,
            config.bitrate_bps / 1000,
            config.frame_duration_ms
        );

        Ok(Self {
            config,
            encoder,
            frame_size,
        })
    }

    pub fn config(&self) -> &AudioEncoderConfig {
        &self.config
    }

    /// Interleaved samples per encoded packet.
    pub fn packet_samples(&self) -> usize {
        self.frame_size * self.config.channels
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.config.frame_duration_ms as u64)
    }

    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() != self.packet_samples() {
            return Err(StreamError::Configuration(format!(
                "Expected {} samples, got {}",
                self.packet_samples(),
                pcm.len()
            )));
        }
        self.encoder
            .encode_vec(pcm, 4000)
            .map_err(|e| StreamError::Runtime(format!("Opus encoding failed: {:?}", e)))
    }
}

struct SinkState {
    encoder: OpusEncoder,
    pending: Vec<i16>,
}

/// Transport callback that encodes audio and queues it for the audio track.
///
/// Disabled tracks keep producing packets, filled with silence.
pub struct OpusSink {
    state: Mutex<SinkState>,
    track: AudioTrack,
    samples: mpsc::UnboundedSender<Sample>,
}

impl OpusSink {
    /// Spawns the writer task on `handle`; it ends when the sink is dropped.
    pub fn new(
        config: AudioEncoderConfig,
        track: AudioTrack,
        writer: Arc<dyn SampleWriter>,
        handle: &tokio::runtime::Handle,
    ) -> Result<Self> {
        let encoder = OpusEncoder::new(config)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Sample>();
        handle.spawn(async move {
            while let Some(sample) = rx.recv().await {
                if let Err(e) = writer.write_sample(&sample).await {
                    tracing::debug!("[OpusSink] {}", e);
                }
            }
        });
        Ok(Self {
            state: Mutex::new(SinkState {
                pending: Vec::with_capacity(encoder.packet_samples() * 2),
                encoder,
            }),
            track,
            samples: tx,
        })
    }
}

impl AudioTransportCallback for OpusSink {
    fn recorded_data_available(&self, frame: &AudioFrame) {
        let mut state = self.state.lock();
        let state = &mut *state;
        if self.track.enabled() {
            state.pending.extend_from_slice(&frame.data);
        } else {
            state.pending.extend(std::iter::repeat_n(0i16, frame.data.len()));
        }

        let packet = state.encoder.packet_samples();
        while state.pending.len() >= packet {
            let pcm: Vec<i16> = state.pending.drain(..packet).collect();
            match state.encoder.encode(&pcm) {
                Ok(data) => {
                    let sample = Sample {
                        data: Bytes::from(data),
                        duration: state.encoder.frame_duration(),
                        ..Default::default()
                    };
                    if self.samples.send(sample).is_err() {
                        tracing::trace!("[OpusSink] Writer gone, dropping packet");
                    }
                }
                Err(e) => tracing::warn!("[OpusSink] {}", e),
            }
        }
    }
}
