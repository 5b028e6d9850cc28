// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! 10 ms audio framing between capture and the transport.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

/// Length of every frame handed to sinks.
pub const FRAME_DURATION_MS: u32 = 10;

/// Interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<i16>,
    pub bits_per_sample: u32,
    pub sample_rate: u32,
    pub channels: usize,
    /// Samples per channel.
    pub frames: usize,
}

impl AudioFrame {
    pub fn new(data: Vec<i16>, sample_rate: u32, channels: usize) -> Self {
        let frames = data.len() / channels.max(1);
        Self {
            data,
            bits_per_sample: 16,
            sample_rate,
            channels,
            frames,
        }
    }

    pub fn silence(sample_rate: u32, channels: usize, frames: usize) -> Self {
        Self::new(vec![0; frames * channels], sample_rate, channels)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn is_silent(&self) -> bool {
        self.data.iter().all(|&s| s == 0)
    }
}

/// Consumer of 10 ms frames.
pub trait AudioSink: Send + Sync {
    fn on_data(&self, frame: &AudioFrame);
}

/// Clamp to [-1, 1] and scale to `i16`.
pub fn float_to_s16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped >= 0.0 {
        (clamped * i16::MAX as f32) as i16
    } else {
        (-clamped * i16::MIN as f32) as i16
    }
}

/// Convert interleaved audio from `from` channels to `to` channels.
///
/// Mono is duplicated into every output channel; everything else is
/// averaged down to mono first.
pub fn mix_channels(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return input.to_vec();
    }
    let frames = input.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in input.chunks_exact(from) {
        let value = if from == 1 {
            frame[0]
        } else {
            frame.iter().sum::<f32>() / from as f32
        };
        out.extend(std::iter::repeat_n(value, to));
    }
    out
}

struct Pending {
    channels: usize,
    samples: Vec<i16>,
}

impl Pending {
    fn frame_samples(&self, sample_rate: u32) -> usize {
        sample_rate as usize * self.channels * FRAME_DURATION_MS as usize / 1000
    }
}

/// Accumulates captured samples and releases them in exact 10 ms frames.
///
/// Input with a different channel count is mixed to the buffer's count.
/// `set_channels` changes the count itself and recomputes the frame size.
pub struct AudioFrameBuffer {
    sample_rate: u32,
    pending: Mutex<Pending>,
    sinks: RwLock<Vec<Arc<dyn AudioSink>>>,
}

impl AudioFrameBuffer {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            pending: Mutex::new(Pending {
                channels: channels.max(1),
                samples: Vec::new(),
            }),
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.pending.lock().channels
    }

    /// Reconfigures the output channel count. Buffered samples belong to
    /// the old layout and are dropped.
    pub fn set_channels(&self, channels: usize) {
        let channels = channels.max(1);
        let mut pending = self.pending.lock();
        if pending.channels == channels {
            return;
        }
        tracing::debug!(
            "[AudioFrameBuffer] Channels {} -> {}, dropping {} buffered samples",
            pending.channels,
            channels,
            pending.samples.len()
        );
        pending.channels = channels;
        pending.samples.clear();
    }

    /// Interleaved samples in one frame: `rate * channels * 10 / 1000`.
    pub fn frame_samples(&self) -> usize {
        self.pending.lock().frame_samples(self.sample_rate)
    }

    pub fn buffered_samples(&self) -> usize {
        self.pending.lock().samples.len()
    }

    pub fn add_sink(&self, sink: Arc<dyn AudioSink>) {
        self.sinks.write().push(sink);
    }

    pub fn remove_sink(&self, sink: &Arc<dyn AudioSink>) {
        self.sinks.write().retain(|s| !Arc::ptr_eq(s, sink));
    }

    pub fn clear(&self) {
        self.pending.lock().samples.clear();
    }

    /// Append float samples with `channels` channels, mixing and converting to `i16`.
    pub fn send_audio(&self, samples: &[f32], channels: usize) {
        let mut pending = self.pending.lock();
        let mixed = mix_channels(samples, channels, pending.channels);
        pending.samples.extend(mixed.into_iter().map(float_to_s16));
    }

    pub fn send_audio_s16(&self, samples: &[i16], channels: usize) {
        {
            let mut pending = self.pending.lock();
            if channels == pending.channels {
                pending.samples.extend_from_slice(samples);
                return;
            }
        }
        let float: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
        self.send_audio(&float, channels);
    }

    /// Dispatch every complete frame to the sinks, oldest first.
    ///
    /// Returns the number of frames dispatched.
    pub fn drain(&self) -> usize {
        // Held across dispatch so concurrent drains cannot reorder frames.
        let mut pending = self.pending.lock();
        let frame_len = pending.frame_samples(self.sample_rate);
        if frame_len == 0 {
            return 0;
        }
        let channels = pending.channels;
        let sinks = self.sinks.read().clone();
        let mut dispatched = 0;
        let mut offset = 0;
        while pending.samples.len() - offset >= frame_len {
            let frame = AudioFrame::new(
                pending.samples[offset..offset + frame_len].to_vec(),
                self.sample_rate,
                channels,
            );
            for sink in &sinks {
                sink.on_data(&frame);
            }
            offset += frame_len;
            dispatched += 1;
        }
        pending.samples.drain(..offset);
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<AudioFrame>>);

    impl AudioSink for Collect {
        fn on_data(&self, frame: &AudioFrame) {
            self.0.lock().push(frame.clone());
        }
    }

    #[test]
    fn test_float_to_s16_clamps() {
        assert_eq!(float_to_s16(2.0), i16::MAX);
        assert_eq!(float_to_s16(-2.0), i16::MIN);
        assert_eq!(float_to_s16(0.0), 0);
    }

    #[test]
    fn test_mix_mono_to_stereo_and_back() {
        assert_eq!(mix_channels(&[0.5, -0.5], 1, 2), vec![0.5, 0.5, -0.5, -0.5]);
        assert_eq!(mix_channels(&[0.25, 0.75, 1.0, 0.0], 2, 1), vec![0.5, 0.5]);
    }

    #[test]
    fn test_drain_in_exact_frames_keeps_remainder() {
        let buffer = AudioFrameBuffer::new(48_000, 2);
        let sink = Arc::new(Collect::default());
        buffer.add_sink(sink.clone());
        assert_eq!(buffer.frame_samples(), 960);

        let mut total = 0;
        for chunk in [100usize, 1500, 333, 2048, 7] {
            buffer.send_audio(&vec![0.1; chunk * 2], 2);
            total += chunk * 2;
            buffer.drain();
            assert!(buffer.buffered_samples() < 960);
        }

        let frames = sink.0.lock();
        assert_eq!(frames.len(), total / 960);
        assert!(frames.iter().all(|f| f.data.len() == 960 && f.frames == 480));
        assert_eq!(buffer.buffered_samples(), total % 960);
    }

    #[test]
    fn test_drain_is_fifo() {
        let buffer = AudioFrameBuffer::new(1000, 1);
        let sink = Arc::new(Collect::default());
        buffer.add_sink(sink.clone());
        let samples: Vec<i16> = (0..25).collect();
        buffer.send_audio_s16(&samples, 1);
        assert_eq!(buffer.drain(), 2);

        let frames = sink.0.lock();
        assert_eq!(frames[0].data, (0..10).collect::<Vec<i16>>());
        assert_eq!(frames[1].data, (10..20).collect::<Vec<i16>>());
        assert_eq!(buffer.buffered_samples(), 5);
    }

    #[test]
    fn test_channel_change_recomputes_frame_size() {
        let buffer = AudioFrameBuffer::new(48_000, 2);
        let sink = Arc::new(Collect::default());
        buffer.add_sink(sink.clone());
        buffer.send_audio(&[0.1; 700], 2);
        assert_eq!(buffer.buffered_samples(), 700);

        buffer.set_channels(1);
        assert_eq!(buffer.channels(), 1);
        assert_eq!(buffer.frame_samples(), 480);
        assert_eq!(buffer.buffered_samples(), 0);

        buffer.send_audio(&[0.1; 1000], 2);
        assert_eq!(buffer.buffered_samples(), 500);
        assert_eq!(buffer.drain(), 1);
        assert_eq!(buffer.buffered_samples(), 20);

        let frames = sink.0.lock();
        assert_eq!(frames[0].channels, 1);
        assert_eq!(frames[0].data.len(), 480);
    }
}
