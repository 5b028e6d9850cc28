// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Simulcast: one encoder per spatial layer behind a single [`VideoEncoder`].

use super::encoder::{
    CodecSpecificInfo, EncodeCompleteCallback, EncodedImage, EncoderInfo, RateControlParameters,
    VideoEncoder, VideoEncoderConfig, VideoFrameType,
};
use super::factory::VideoEncoderFactory;
use super::video_codec::SdpVideoFormat;
use crate::core::video::{layer_resolution, VideoFrame, SIMULCAST_LAYERS};
use crate::core::{Result, StreamError};
use std::sync::Arc;

/// Builds a [`SimulcastEncoderAdapter`] when more than one layer is requested.
#[derive(Clone)]
pub struct SimulcastEncoderFactory {
    inner: VideoEncoderFactory,
}

impl SimulcastEncoderFactory {
    pub fn new(inner: VideoEncoderFactory) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &VideoEncoderFactory {
        &self.inner
    }

    pub fn create_encoder(&self, format: &SdpVideoFormat, layers: usize) -> Result<Box<dyn VideoEncoder>> {
        if layers <= 1 {
            return self.inner.create_encoder(format);
        }
        if !format.codec.supports_simulcast() {
            return Err(StreamError::NotSupported(format!(
                "{} does not support simulcast",
                format.codec
            )));
        }

        let layers = layers.min(SIMULCAST_LAYERS);
        let encoders = (0..layers)
            .map(|layer| self.inner.create_layer_encoder(format, layer))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(SimulcastEncoderAdapter::new(encoders)))
    }
}

/// Bitrate share of `layer`: each lower layer gets half of the one above.
fn layer_bitrate(total_bps: u32, layer: usize, layers: usize) -> u32 {
    let weight = |i: usize| 1.0 / (1u32 << i) as f64;
    let total_weight: f64 = (0..layers).map(weight).sum();
    (total_bps as f64 * weight(layer) / total_weight) as u32
}

/// Fans each frame out to per-layer encoders and tags their output.
pub struct SimulcastEncoderAdapter {
    layers: Vec<Box<dyn VideoEncoder>>,
}

impl SimulcastEncoderAdapter {
    pub fn new(layers: Vec<Box<dyn VideoEncoder>>) -> Self {
        Self { layers }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

impl VideoEncoder for SimulcastEncoderAdapter {
    fn init_encode(&mut self, config: &VideoEncoderConfig) -> Result<()> {
        let count = self.layers.len();
        for (i, encoder) in self.layers.iter_mut().enumerate() {
            let (width, height) = layer_resolution(config.width, config.height, i);
            let divisor = 1u32 << i;
            let layer_config = VideoEncoderConfig {
                width,
                height,
                min_bitrate_bps: config.min_bitrate_bps / divisor,
                start_bitrate_bps: config.start_bitrate_bps / divisor,
                max_bitrate_bps: config.max_bitrate_bps / divisor,
                simulcast_layers: 1,
                ..config.clone()
            };
            encoder.init_encode(&layer_config)?;
        }
        tracing::info!("[SimulcastEncoder] Initialised {} layers", count);
        Ok(())
    }

    fn register_encode_complete_callback(&mut self, callback: Option<EncodeCompleteCallback>) {
        for (i, encoder) in self.layers.iter_mut().enumerate() {
            let tagged = callback.as_ref().map(|cb| {
                let cb = Arc::clone(cb);
                let tagged: EncodeCompleteCallback = Arc::new(move |image: &EncodedImage, info: &CodecSpecificInfo| {
                    let mut image = image.clone();
                    image.spatial_index = Some(i);
                    cb(&image, info);
                });
                tagged
            });
            encoder.register_encode_complete_callback(tagged);
        }
    }

    fn encode(&mut self, frame: &VideoFrame, frame_types: &[VideoFrameType]) -> Result<()> {
        for encoder in &mut self.layers {
            encoder.encode(frame, frame_types)?;
        }
        Ok(())
    }

    fn set_rates(&mut self, parameters: RateControlParameters) {
        let count = self.layers.len();
        for (i, encoder) in self.layers.iter_mut().enumerate() {
            encoder.set_rates(RateControlParameters {
                bitrate_bps: layer_bitrate(parameters.bitrate_bps, i, count),
                framerate_fps: parameters.framerate_fps,
            });
        }
    }

    fn release(&mut self) -> Result<()> {
        let mut first_error = None;
        for encoder in &mut self.layers {
            if let Err(e) = encoder.release() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn encoder_info(&self) -> EncoderInfo {
        let infos: Vec<_> = self.layers.iter().map(|e| e.encoder_info()).collect();
        EncoderInfo {
            implementation_name: format!(
                "SimulcastEncoderAdapter ({})",
                infos
                    .iter()
                    .map(|i| i.implementation_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            supports_native_handle: infos.iter().all(|i| i.supports_native_handle),
            is_hardware_accelerated: infos.iter().all(|i| i.is_hardware_accelerated),
        }
    }
}
