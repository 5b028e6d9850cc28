// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GPU texture boundary.
//!
//! Readback and color conversion on real GPUs live with the host. The crate
//! only needs dimensions, a copy primitive and a CPU readback, so those are
//! the whole surface of [`Texture`] and [`GpuDevice`]. [`CpuDevice`] is the
//! in-process implementation used by the CLI and the tests.

use crate::core::{Result, StreamError};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// Pixel layout of a texture. Both are 4 bytes per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// B, G, R, A byte order (what libyuv calls ARGB).
    #[default]
    Bgra8,
    Rgba8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureDescriptor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Bgra8,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Graphics API the host renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsApi {
    Vulkan,
    D3D11,
    D3D12,
    Metal,
    OpenGl,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other,
}

/// What the capability probes look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptor {
    pub api: GraphicsApi,
    pub vendor: GpuVendor,
}

impl GpuDescriptor {
    pub fn new(api: GraphicsApi, vendor: GpuVendor) -> Self {
        Self { api, vendor }
    }

    pub fn cpu() -> Self {
        Self::new(GraphicsApi::Cpu, GpuVendor::Other)
    }
}

pub trait Texture: Send + Sync {
    fn descriptor(&self) -> TextureDescriptor;

    /// Blocking readback of the pixels, tightly packed.
    fn read_back(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;
}

/// Device that allocates encoder backing textures and copies into them.
pub trait GpuDevice: Send + Sync {
    fn descriptor(&self) -> GpuDescriptor;

    fn create_texture(&self, desc: TextureDescriptor) -> Result<Arc<dyn Texture>>;

    /// Copy `src` into `dst`, scaling when their sizes differ.
    fn copy_texture(&self, src: &dyn Texture, dst: &dyn Texture) -> Result<()>;
}

/// Texture backed by host memory.
pub struct CpuTexture {
    desc: TextureDescriptor,
    pixels: Mutex<Vec<u8>>,
}

impl CpuTexture {
    pub fn new(desc: TextureDescriptor) -> Self {
        Self {
            desc,
            pixels: Mutex::new(vec![0; desc.byte_len()]),
        }
    }

    pub fn from_pixels(desc: TextureDescriptor, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != desc.byte_len() {
            return Err(StreamError::Configuration(format!(
                "Texture {}x{} needs {} bytes, got {}",
                desc.width,
                desc.height,
                desc.byte_len(),
                pixels.len()
            )));
        }
        Ok(Self {
            desc,
            pixels: Mutex::new(pixels),
        })
    }

    /// Overwrite the whole texture.
    pub fn write(&self, pixels: &[u8]) -> Result<()> {
        let mut guard = self.pixels.lock();
        if pixels.len() != guard.len() {
            return Err(StreamError::Configuration(format!(
                "Texture write of {} bytes into {} byte texture",
                pixels.len(),
                guard.len()
            )));
        }
        guard.copy_from_slice(pixels);
        Ok(())
    }

    pub fn fill(&self, bgra: [u8; 4]) {
        let mut guard = self.pixels.lock();
        for px in guard.chunks_exact_mut(4) {
            px.copy_from_slice(&bgra);
        }
    }
}

impl Texture for CpuTexture {
    fn descriptor(&self) -> TextureDescriptor {
        self.desc
    }

    fn read_back(&self) -> Result<Vec<u8>> {
        Ok(self.pixels.lock().clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// [`GpuDevice`] that keeps every texture in host memory.
#[derive(Debug, Clone, Copy)]
pub struct CpuDevice {
    descriptor: GpuDescriptor,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self {
            descriptor: GpuDescriptor::cpu(),
        }
    }

    /// Report a different API/vendor pair, for exercising backend probes.
    pub fn with_descriptor(descriptor: GpuDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for CpuDevice {
    fn descriptor(&self) -> GpuDescriptor {
        self.descriptor
    }

    fn create_texture(&self, desc: TextureDescriptor) -> Result<Arc<dyn Texture>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(StreamError::Resource(format!(
                "Cannot allocate {}x{} texture",
                desc.width, desc.height
            )));
        }
        Ok(Arc::new(CpuTexture::new(desc)))
    }

    fn copy_texture(&self, src: &dyn Texture, dst: &dyn Texture) -> Result<()> {
        let dst = dst
            .as_any()
            .downcast_ref::<CpuTexture>()
            .ok_or_else(|| StreamError::NotSupported("Destination is not a CPU texture".into()))?;
        let src_desc = src.descriptor();
        let pixels = src.read_back()?;

        if src_desc.width == dst.desc.width && src_desc.height == dst.desc.height {
            return dst.write(&pixels);
        }

        // Nearest-neighbour scale
        let (sw, sh) = (src_desc.width as usize, src_desc.height as usize);
        let (dw, dh) = (dst.desc.width as usize, dst.desc.height as usize);
        let mut out = dst.pixels.lock();
        for y in 0..dh {
            let sy = y * sh / dh;
            for x in 0..dw {
                let sx = x * sw / dw;
                let s = (sy * sw + sx) * 4;
                let d = (y * dw + x) * 4;
                out[d..d + 4].copy_from_slice(&pixels[s..s + 4]);
            }
        }
        Ok(())
    }
}
