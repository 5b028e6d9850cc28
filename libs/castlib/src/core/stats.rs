// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Publisher pipeline statistics as exponential moving averages.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Largest sample window used for the averages.
const MAX_SAMPLES: u32 = 60;

fn ema(prev: f64, samples: u32, value: f64) -> f64 {
    let mult = 2.0 / (samples as f64 + 1.0);
    (value - prev) * mult + prev
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub submit_fps: f64,
    pub texture_readback_secs: f64,
    pub encoder_latency_ms: f64,
    pub encoder_bitrate_mbps: f64,
    pub encoder_qp: f64,
}

#[derive(Default)]
struct StatsState {
    snapshot: StatsSnapshot,
    frames: u32,
    readbacks: u32,
    encoder_samples: u32,
    last_frame: Option<Instant>,
}

/// Shared by capture and encoders of every session on a runtime.
#[derive(Default)]
pub struct PublisherStats {
    state: Mutex<StatsState>,
}

impl PublisherStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A captured frame was handed to the encoder pipeline.
    pub fn frame_rendered(&self) {
        self.frame_rendered_at(Instant::now());
    }

    fn frame_rendered_at(&self, now: Instant) {
        let mut state = self.state.lock();
        if let Some(last) = state.last_frame {
            let delta = now.saturating_duration_since(last).as_secs_f64();
            if delta > 0.0 {
                state.frames = (state.frames + 1).min(MAX_SAMPLES);
                state.snapshot.submit_fps = ema(state.snapshot.submit_fps, state.frames, 1.0 / delta);
            }
        }
        state.last_frame = Some(now);
    }

    pub fn texture_readback(&self, elapsed: Duration) {
        let mut state = self.state.lock();
        state.readbacks = (state.readbacks + 1).min(MAX_SAMPLES);
        state.snapshot.texture_readback_secs = ema(
            state.snapshot.texture_readback_secs,
            state.readbacks,
            elapsed.as_secs_f64(),
        );
    }

    pub fn set_encoder_stats(&self, latency_ms: f64, bitrate_mbps: f64, qp: i32) {
        let mut state = self.state.lock();
        state.encoder_samples = (state.encoder_samples + 1).min(MAX_SAMPLES);
        let n = state.encoder_samples;
        let s = &mut state.snapshot;
        s.encoder_latency_ms = ema(s.encoder_latency_ms, n, latency_ms);
        s.encoder_bitrate_mbps = ema(s.encoder_bitrate_mbps, n, bitrate_mbps);
        s.encoder_qp = ema(s.encoder_qp, n, qp as f64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.state.lock().snapshot
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            "[Stats] submit_fps={:.2} readback={:.6}s encode_latency={:.2}ms bitrate={:.2}Mbps qp={:.0}",
            s.submit_fps,
            s.texture_readback_secs,
            s.encoder_latency_ms,
            s.encoder_bitrate_mbps,
            s.encoder_qp
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_weighs_fully() {
        // 2/(1+1) = 1, so the first sample replaces the zero average
        assert_eq!(ema(0.0, 1, 30.0), 30.0);
        assert!((ema(30.0, 3, 60.0) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_submit_fps_tracks_frame_interval() {
        let stats = PublisherStats::new();
        let start = Instant::now();
        for i in 0..10 {
            stats.frame_rendered_at(start + Duration::from_millis(i * 20));
        }
        let fps = stats.snapshot().submit_fps;
        assert!((fps - 50.0).abs() < 1e-6, "fps = {}", fps);
    }

    #[test]
    fn test_encoder_stats() {
        let stats = PublisherStats::new();
        stats.set_encoder_stats(4.0, 2.5, 30);
        let s = stats.snapshot();
        assert_eq!(s.encoder_latency_ms, 4.0);
        assert_eq!(s.encoder_bitrate_mbps, 2.5);
        assert_eq!(s.encoder_qp, 30.0);
    }
}
