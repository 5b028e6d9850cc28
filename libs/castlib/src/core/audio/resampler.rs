// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Sample-rate conversion for captured audio.

use crate::core::{Result, StreamError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Streaming resampler over interleaved `f32`; any input length is accepted.
pub struct AudioResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    planar: Vec<Vec<f32>>,
}

impl AudioResampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 || channels == 0 {
            return Err(StreamError::Configuration(format!(
                "Invalid resampler {} Hz -> {} Hz, {} channels",
                source_rate, target_rate, channels
            )));
        }
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let chunk_size = (source_rate / 100).max(1) as usize;
        let ratio = target_rate as f64 / source_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, channels)
            .map_err(|e| StreamError::Runtime(format!("Failed to create resampler: {:?}", e)))?;

        tracing::debug!(
            "[AudioResampler] {} Hz -> {} Hz, {} channels",
            source_rate,
            target_rate,
            channels
        );

        Ok(Self {
            inner,
            channels,
            source_rate,
            target_rate,
            planar: vec![Vec::new(); channels],
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Feed interleaved input; returns whatever output full chunks produced.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        for frame in input.chunks_exact(self.channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.planar[ch].push(sample);
            }
        }

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.planar[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .planar
                .iter_mut()
                .map(|ch| ch.drain(..needed).collect())
                .collect();
            let resampled = self
                .inner
                .process(&chunk, None)
                .map_err(|e| StreamError::Runtime(format!("Resampling failed: {:?}", e)))?;

            let frames = resampled.first().map_or(0, |c| c.len());
            output.reserve(frames * self.channels);
            for i in 0..frames {
                for channel in &resampled {
                    output.push(channel[i]);
                }
            }
        }
        Ok(output)
    }
}
