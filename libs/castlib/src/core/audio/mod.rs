// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Audio capture, framing and paced transport.

mod frame_buffer;
mod resampler;
mod source;
mod transport;

pub use frame_buffer::{
    float_to_s16, mix_channels, AudioFrame, AudioFrameBuffer, AudioSink, FRAME_DURATION_MS,
};
pub use resampler::AudioResampler;
pub use source::{volume_factor, AudioSource};
pub use transport::{
    AudioTransport, AudioTransportCallback, MAX_VOLUME, TRANSPORT_CHANNELS, TRANSPORT_SAMPLE_RATE,
};
