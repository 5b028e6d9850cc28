// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Video codec types, encoder wrappers and factories.

mod encoder;
mod factory;
mod hardware;
mod simulcast;
mod software;
mod video_codec;

pub use encoder::{
    CodecSpecificInfo, EncodeCompleteCallback, EncodedImage, EncoderInfo, H264PacketizationMode,
    RateControlParameters, VideoEncoder, VideoEncoderConfig, VideoFrameType,
};
pub use factory::{preferred_format, supported_formats, VideoEncoderFactory};
pub use hardware::{
    HardwareEncoderBackend, HardwareEncoderProvider, HardwareEncoderRegistry,
    HardwareEncoderSettings, HardwarePacket, HardwareVideoEncoder,
};
pub use simulcast::{SimulcastEncoderAdapter, SimulcastEncoderFactory};
#[cfg(feature = "openh264")]
pub use software::{OpenH264Encoder, OpenH264Provider};
pub use software::{SoftwareEncoderProvider, SoftwareVideoEncoder};
pub use video_codec::{H264Level, H264Profile, SdpVideoFormat, VideoCodecKind};
