// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Video frame buffers handed to encoders.

use super::encoder_context::CapturedInput;
use super::encoder_input::InputFrameHandle;
use super::texture::{PixelFormat, Texture};
use crate::core::{Result, StreamError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Planar 4:2:0 frame in host memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Buffer {
    width: u32,
    height: u32,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl I420Buffer {
    pub fn chroma_width(width: u32) -> u32 {
        width.div_ceil(2)
    }

    pub fn chroma_height(height: u32) -> u32 {
        height.div_ceil(2)
    }

    /// Black frame (Y=0, U=V=128), what a disabled track sends.
    pub fn black(width: u32, height: u32) -> Self {
        let chroma = (Self::chroma_width(width) * Self::chroma_height(height)) as usize;
        Self {
            width,
            height,
            y: vec![0; (width * height) as usize],
            u: vec![128; chroma],
            v: vec![128; chroma],
        }
    }

    pub fn from_planes(width: u32, height: u32, y: Vec<u8>, u: Vec<u8>, v: Vec<u8>) -> Result<Self> {
        let chroma = (Self::chroma_width(width) * Self::chroma_height(height)) as usize;
        if y.len() != (width * height) as usize || u.len() != chroma || v.len() != chroma {
            return Err(StreamError::Configuration(format!(
                "I420 planes do not match {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            y,
            u,
            v,
        })
    }

    /// BT.601 limited-range conversion from 4-byte pixels.
    pub fn from_packed(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let (w, h) = (width as usize, height as usize);
        if pixels.len() != w * h * 4 {
            return Err(StreamError::Configuration(format!(
                "Expected {} bytes for {}x{} frame, got {}",
                w * h * 4,
                width,
                height,
                pixels.len()
            )));
        }

        let (ri, gi, bi) = match format {
            PixelFormat::Bgra8 => (2, 1, 0),
            PixelFormat::Rgba8 => (0, 1, 2),
        };
        let rgb_at = |x: usize, y: usize| -> (i32, i32, i32) {
            let p = (y * w + x) * 4;
            (
                pixels[p + ri] as i32,
                pixels[p + gi] as i32,
                pixels[p + bi] as i32,
            )
        };

        let mut y_plane = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let (r, g, b) = rgb_at(x, y);
                y_plane.push((((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8);
            }
        }

        let cw = Self::chroma_width(width) as usize;
        let ch = Self::chroma_height(height) as usize;
        let mut u_plane = Vec::with_capacity(cw * ch);
        let mut v_plane = Vec::with_capacity(cw * ch);
        for cy in 0..ch {
            for cx in 0..cw {
                let (mut r, mut g, mut b, mut n) = (0, 0, 0, 0);
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                    if x < w && y < h {
                        let (pr, pg, pb) = rgb_at(x, y);
                        r += pr;
                        g += pg;
                        b += pb;
                        n += 1;
                    }
                }
                let (r, g, b) = (r / n, g / n, b / n);
                u_plane.push((((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8);
                v_plane.push((((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8);
            }
        }

        Ok(Self {
            width,
            height,
            y: y_plane,
            u: u_plane,
            v: v_plane,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data_y(&self) -> &[u8] {
        &self.y
    }

    pub fn data_u(&self) -> &[u8] {
        &self.u
    }

    pub fn data_v(&self) -> &[u8] {
        &self.v
    }

    /// Y, U and V planes back to back.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.y.len() + self.u.len() + self.v.len());
        out.extend_from_slice(&self.y);
        out.extend_from_slice(&self.u);
        out.extend_from_slice(&self.v);
        out
    }

    pub fn is_black(&self) -> bool {
        self.y.iter().all(|&b| b == 0)
            && self.u.iter().all(|&b| b == 128)
            && self.v.iter().all(|&b| b == 128)
    }
}

/// GPU-resident frame. Holds its input frame claim until dropped.
pub struct NativeFrameBuffer {
    input: CapturedInput,
    i420: Mutex<Option<Arc<I420Buffer>>>,
}

impl NativeFrameBuffer {
    pub fn new(input: CapturedInput) -> Self {
        Self {
            input,
            i420: Mutex::new(None),
        }
    }

    pub fn width(&self) -> u32 {
        self.input.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.input.frame.height()
    }

    pub fn input_frame(&self) -> &InputFrameHandle {
        &self.input.frame
    }

    pub fn texture(&self) -> &Arc<dyn Texture> {
        &self.input.texture
    }

    /// Read back and convert on first call; later calls reuse the result.
    pub fn to_i420(&self) -> Result<Arc<I420Buffer>> {
        let mut cached = self.i420.lock();
        if let Some(buffer) = cached.as_ref() {
            return Ok(Arc::clone(buffer));
        }

        let desc = self.input.texture.descriptor();
        let pixels = self.input.texture.read_back()?;
        let buffer = Arc::new(I420Buffer::from_packed(
            &pixels,
            desc.width,
            desc.height,
            desc.format,
        )?);
        *cached = Some(Arc::clone(&buffer));
        Ok(buffer)
    }

    pub fn has_i420(&self) -> bool {
        self.i420.lock().is_some()
    }
}

/// One captured frame at several resolutions, layer 0 being full size.
#[derive(Default)]
pub struct SimulcastFrameBuffer {
    layers: Vec<Arc<NativeFrameBuffer>>,
}

impl SimulcastFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, layer: Arc<NativeFrameBuffer>) {
        self.layers.push(layer);
    }

    pub fn layer(&self, index: usize) -> Option<&Arc<NativeFrameBuffer>> {
        self.layers.get(index)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn width(&self) -> u32 {
        self.layers.first().map(|l| l.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.layers.first().map(|l| l.height()).unwrap_or(0)
    }
}

#[derive(Clone)]
pub enum VideoFrameBuffer {
    Native(Arc<NativeFrameBuffer>),
    I420(Arc<I420Buffer>),
    Simulcast(Arc<SimulcastFrameBuffer>),
}

impl VideoFrameBuffer {
    pub fn width(&self) -> u32 {
        match self {
            VideoFrameBuffer::Native(b) => b.width(),
            VideoFrameBuffer::I420(b) => b.width(),
            VideoFrameBuffer::Simulcast(b) => b.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            VideoFrameBuffer::Native(b) => b.height(),
            VideoFrameBuffer::I420(b) => b.height(),
            VideoFrameBuffer::Simulcast(b) => b.height(),
        }
    }

    pub fn is_native(&self) -> bool {
        !matches!(self, VideoFrameBuffer::I420(_))
    }

    pub fn to_i420(&self) -> Result<Arc<I420Buffer>> {
        match self {
            VideoFrameBuffer::Native(b) => b.to_i420(),
            VideoFrameBuffer::I420(b) => Ok(Arc::clone(b)),
            VideoFrameBuffer::Simulcast(b) => b
                .layer(0)
                .ok_or_else(|| StreamError::Runtime("Simulcast frame without layers".into()))?
                .to_i420(),
        }
    }

    /// The buffer for one simulcast layer; non-simulcast buffers are their own layer 0.
    pub fn layer(&self, index: usize) -> Option<VideoFrameBuffer> {
        match self {
            VideoFrameBuffer::Simulcast(b) => b
                .layer(index)
                .map(|l| VideoFrameBuffer::Native(Arc::clone(l))),
            other if index == 0 => Some(other.clone()),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct VideoFrame {
    pub buffer: VideoFrameBuffer,
    pub timestamp_us: i64,
}

impl VideoFrame {
    pub fn new(buffer: VideoFrameBuffer, timestamp_us: i64) -> Self {
        Self {
            buffer,
            timestamp_us,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// 90 kHz RTP clock value for this frame's capture time.
    pub fn rtp_timestamp(&self) -> u32 {
        (self.timestamp_us.wrapping_mul(90) / 1000) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::encoder_context::EncoderContext;
    use crate::core::video::texture::CpuDevice;

    fn native(width: u32, height: u32, bgra: [u8; 4]) -> (EncoderContext, Arc<NativeFrameBuffer>) {
        let ctx = EncoderContext::new(Arc::new(CpuDevice::new()), width, height, false).unwrap();
        let input = ctx.obtain_captured_input().unwrap();
        let pixels: Vec<u8> = bgra.iter().copied().cycle().take((width * height * 4) as usize).collect();
        input
            .texture
            .as_any()
            .downcast_ref::<crate::core::video::texture::CpuTexture>()
            .unwrap()
            .write(&pixels)
            .unwrap();
        (ctx, Arc::new(NativeFrameBuffer::new(input)))
    }

    #[test]
    fn test_white_and_black_conversion() {
        let white = vec![255u8; 4 * 4 * 4];
        let i420 = I420Buffer::from_packed(&white, 4, 4, PixelFormat::Bgra8).unwrap();
        assert!(i420.data_y().iter().all(|&y| y == 235));
        assert!(i420.data_u().iter().all(|&u| u == 128));

        let black = I420Buffer::from_packed(&vec![0u8; 64], 4, 4, PixelFormat::Rgba8).unwrap();
        assert!(black.data_y().iter().all(|&y| y == 16));
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let i420 = I420Buffer::black(5, 3);
        assert_eq!(i420.data_u().len(), 3 * 2);
        assert!(i420.is_black());
    }

    #[test]
    fn test_native_buffer_converts_lazily_once() {
        let (_ctx, buffer) = native(8, 8, [0, 0, 255, 255]);
        assert!(!buffer.has_i420());
        let first = buffer.to_i420().unwrap();
        let second = buffer.to_i420().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // Pure red in BT.601: Y=82, V=240
        assert_eq!(first.data_y()[0], 82);
        assert_eq!(first.data_v()[0], 240);
    }

    #[test]
    fn test_native_buffer_releases_input_on_drop() {
        let (ctx, buffer) = native(8, 8, [0, 0, 0, 255]);
        assert_eq!(ctx.pool().in_flight(), 1);
        drop(buffer);
        assert_eq!(ctx.pool().in_flight(), 0);
    }

    #[test]
    fn test_simulcast_dimensions_come_from_first_layer() {
        let (_a, full) = native(64, 32, [0; 4]);
        let (_b, half) = native(32, 16, [0; 4]);
        let mut simulcast = SimulcastFrameBuffer::new();
        simulcast.add_layer(full);
        simulcast.add_layer(half);

        assert_eq!(simulcast.num_layers(), 2);
        assert_eq!((simulcast.width(), simulcast.height()), (64, 32));
        let buffer = VideoFrameBuffer::Simulcast(Arc::new(simulcast));
        assert_eq!(buffer.layer(1).unwrap().width(), 32);
        assert!(buffer.layer(2).is_none());
    }
}
