// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host-fed audio capture.

use super::frame_buffer::{mix_channels, AudioFrameBuffer, AudioSink};
use super::resampler::AudioResampler;
use super::transport::{AudioTransport, TRANSPORT_CHANNELS, TRANSPORT_SAMPLE_RATE};
use crate::core::config::AudioCaptureConfig;
use crate::core::streaming::AudioTrack;
use crate::core::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Linear gain for a level in decibels.
pub fn volume_factor(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

struct Capture {
    track: AudioTrack,
    sink: Arc<dyn AudioSink>,
}

/// Turns host audio callbacks into 10 ms frames on the transport.
///
/// Input can arrive at any rate and channel count; it is mixed, resampled
/// and framed before reaching the transport.
pub struct AudioSource {
    buffer: AudioFrameBuffer,
    resampler: Mutex<Option<AudioResampler>>,
    gain_bits: AtomicU32,
    capture: Mutex<Option<Capture>>,
}

impl AudioSource {
    pub fn new(config: &AudioCaptureConfig) -> Self {
        let source = Self {
            buffer: AudioFrameBuffer::new(TRANSPORT_SAMPLE_RATE, TRANSPORT_CHANNELS),
            resampler: Mutex::new(None),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            capture: Mutex::new(None),
        };
        source.set_volume_multiplier(config.volume_multiplier_db);
        source
    }

    pub fn set_volume_multiplier(&self, db: f32) {
        let factor = volume_factor(db);
        self.gain_bits.store(factor.to_bits(), Ordering::Relaxed);
        tracing::debug!("[AudioSource] Volume {} dB (x{:.3})", db, factor);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn start_capture(&self, transport: &AudioTransport) -> AudioTrack {
        let mut capture = self.capture.lock();
        if let Some(existing) = capture.as_ref() {
            tracing::warn!("[AudioSource] Already capturing");
            return existing.track.clone();
        }
        let sink: Arc<dyn AudioSink> = Arc::new(transport.clone());
        self.buffer.add_sink(Arc::clone(&sink));
        let track = AudioTrack::new(
            format!("audio-{}", uuid::Uuid::new_v4()),
            format!("castlib-{}", uuid::Uuid::new_v4()),
        );
        *capture = Some(Capture {
            track: track.clone(),
            sink,
        });
        tracing::info!("[AudioSource] Capture started");
        track
    }

    pub fn stop_capture(&self) {
        let Some(capture) = self.capture.lock().take() else {
            return;
        };
        self.buffer.remove_sink(&capture.sink);
        self.buffer.clear();
        *self.resampler.lock() = None;
        tracing::info!("[AudioSource] Capture stopped");
    }

    pub fn track(&self) -> Option<AudioTrack> {
        self.capture.lock().as_ref().map(|c| c.track.clone())
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_some()
    }

    /// Feed interleaved float samples from the host.
    pub fn push(&self, samples: &[f32], sample_rate: u32, channels: usize) -> Result<()> {
        if !self.is_capturing() || samples.is_empty() {
            return Ok(());
        }

        let gain = self.gain();
        let mut mixed = mix_channels(samples, channels, TRANSPORT_CHANNELS);
        if gain != 1.0 {
            mixed.iter_mut().for_each(|s| *s *= gain);
        }

        let converted = if sample_rate == TRANSPORT_SAMPLE_RATE {
            mixed
        } else {
            let mut resampler = self.resampler.lock();
            if resampler.as_ref().map(|r| r.source_rate()) != Some(sample_rate) {
                *resampler = Some(AudioResampler::new(
                    sample_rate,
                    TRANSPORT_SAMPLE_RATE,
                    TRANSPORT_CHANNELS,
                )?);
            }
            match resampler.as_mut() {
                Some(r) => r.process(&mixed)?,
                None => return Ok(()),
            }
        };

        self.buffer.send_audio(&converted, TRANSPORT_CHANNELS);
        self.buffer.drain();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_factor() {
        assert!((volume_factor(0.0) - 1.0).abs() < 1e-6);
        assert!((volume_factor(20.0) - 10.0).abs() < 1e-4);
        assert!((volume_factor(-6.0) - 0.501).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_push_only_while_capturing() {
        let transport = AudioTransport::new();
        transport.start_recording(&tokio::runtime::Handle::current());
        let source = AudioSource::new(&AudioCaptureConfig::default());

        source.push(&[0.5; 960], 48_000, 2).unwrap();
        assert_eq!(transport.queued_frames(), 0);

        let track = source.start_capture(&transport);
        assert!(source.start_capture(&transport).id() == track.id());
        source.push(&[0.5; 480], 48_000, 1).unwrap();
        assert!(transport.queued_frames() <= 1);
        assert!(transport.frames_delivered() + transport.queued_frames() as u64 >= 1);

        source.stop_capture();
        assert!(!source.is_capturing());
        transport.stop_recording();
    }
}
