// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Capture-to-encode frame pipeline.

mod capturer;
mod encoder_context;
mod encoder_input;
mod frame_buffer;
mod source_adapter;
mod texture;

pub use capturer::{
    capture_clock_us, RenderTargetCapturer, ScreenCapturer, ScreenSource, VideoCaptureSettings,
    VideoSource, ViewportCapturer,
};
pub use encoder_context::{CapturedInput, EncoderBackend, EncoderContext};
pub use encoder_input::{EncoderInputPool, FrameId, InputFrameHandle};
pub use frame_buffer::{
    I420Buffer, NativeFrameBuffer, SimulcastFrameBuffer, VideoFrame, VideoFrameBuffer,
};
pub use source_adapter::{layer_resolution, VideoSourceAdapter, SIMULCAST_LAYERS};
pub use texture::{
    CpuDevice, CpuTexture, GpuDescriptor, GpuDevice, GpuVendor, GraphicsApi, PixelFormat, Texture,
    TextureDescriptor,
};
