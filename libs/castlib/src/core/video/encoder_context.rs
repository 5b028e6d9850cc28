// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Encoder input context: pool of input frames plus their backing textures.

use super::encoder_input::{EncoderInputPool, FrameId, InputFrameHandle};
use super::texture::{GpuDescriptor, GpuDevice, GpuVendor, GraphicsApi, Texture, TextureDescriptor};
use crate::core::{Result, StreamError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where encoder input frames live, chosen from the host GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderBackend {
    Vulkan,
    Cuda,
    D3D11,
    D3D12,
    Cpu,
}

impl EncoderBackend {
    /// `None` when the API/vendor combination has no encoder path.
    pub fn probe(gpu: &GpuDescriptor) -> Option<Self> {
        match (gpu.api, gpu.vendor) {
            (GraphicsApi::Vulkan, GpuVendor::Amd) => Some(EncoderBackend::Vulkan),
            (GraphicsApi::Vulkan, GpuVendor::Nvidia) => Some(EncoderBackend::Cuda),
            (GraphicsApi::D3D11, _) => Some(EncoderBackend::D3D11),
            (GraphicsApi::D3D12, _) => Some(EncoderBackend::D3D12),
            (GraphicsApi::Cpu, _) => Some(EncoderBackend::Cpu),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EncoderBackend::Vulkan => "VULKAN",
            EncoderBackend::Cuda => "CUDA",
            EncoderBackend::D3D11 => "D3D11",
            EncoderBackend::D3D12 => "D3D12",
            EncoderBackend::Cpu => "CPU",
        }
    }
}

impl fmt::Display for EncoderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An input frame with the texture the capture copies into.
#[derive(Clone)]
pub struct CapturedInput {
    pub frame: InputFrameHandle,
    pub texture: Arc<dyn Texture>,
}

type BackBuffers = Arc<Mutex<HashMap<FrameId, Arc<dyn Texture>>>>;

/// One encoder input configuration (one simulcast layer).
pub struct EncoderContext {
    gpu: Arc<dyn GpuDevice>,
    backend: Option<EncoderBackend>,
    pool: EncoderInputPool,
    back_buffers: BackBuffers,
    fixed_resolution: bool,
}

impl EncoderContext {
    pub fn new(
        gpu: Arc<dyn GpuDevice>,
        width: u32,
        height: u32,
        fixed_resolution: bool,
    ) -> Result<Self> {
        check_dimensions(width, height)?;

        let descriptor = gpu.descriptor();
        let backend = EncoderBackend::probe(&descriptor);
        match backend {
            Some(backend) => tracing::info!(
                "[EncoderContext] {}x{} using {} backend",
                width,
                height,
                backend
            ),
            None => tracing::warn!(
                "[EncoderContext] No encoder backend for {:?}/{:?}",
                descriptor.api,
                descriptor.vendor
            ),
        }

        Ok(Self {
            gpu,
            backend,
            pool: EncoderInputPool::new(width, height, EncoderInputPool::DEFAULT_MAX_BUFFERS),
            back_buffers: Arc::new(Mutex::new(HashMap::new())),
            fixed_resolution,
        })
    }

    pub fn backend(&self) -> Option<EncoderBackend> {
        self.backend
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.pool.resolution()
    }

    pub fn is_fixed_resolution(&self) -> bool {
        self.fixed_resolution
    }

    pub fn pool(&self) -> &EncoderInputPool {
        &self.pool
    }

    /// Textures currently bound to live frames.
    pub fn bound_textures(&self) -> usize {
        self.back_buffers.lock().len()
    }

    /// Reconfigure for a new capture resolution.
    ///
    /// Returns `Ok(true)` when the pool was flushed. Identical sizes and
    /// fixed-resolution contexts are left alone.
    pub fn set_resolution(&self, width: u32, height: u32) -> Result<bool> {
        check_dimensions(width, height)?;

        if self.fixed_resolution {
            return Ok(false);
        }
        if self.pool.resolution() == (width, height) {
            return Ok(false);
        }

        let (old_w, old_h) = self.pool.resolution();
        tracing::info!(
            "[EncoderContext] Resolution change {}x{} -> {}x{}",
            old_w,
            old_h,
            width,
            height
        );
        self.pool.reconfigure(width, height);
        Ok(true)
    }

    /// Claim an input frame and its backing texture.
    ///
    /// Returns `None` when the pool is exhausted or no backing texture can be
    /// created; the caller drops that captured frame.
    pub fn obtain_captured_input(&self) -> Option<CapturedInput> {
        let Some(backend) = self.backend else {
            tracing::error!("[EncoderContext] Unsupported GPU backend, dropping frame");
            return None;
        };

        let Some(frame) = self.pool.obtain() else {
            tracing::debug!("[EncoderContext] No free encoder input, dropping frame");
            return None;
        };

        if let Some(texture) = self.back_buffers.lock().get(&frame.id()) {
            return Some(CapturedInput {
                texture: Arc::clone(texture),
                frame,
            });
        }

        let desc = TextureDescriptor::new(frame.width(), frame.height());
        let texture = match self.gpu.create_texture(desc) {
            Ok(texture) => texture,
            Err(e) => {
                tracing::error!(
                    "[EncoderContext] Failed to create {} backing texture: {}",
                    backend,
                    e
                );
                return None;
            }
        };

        self.back_buffers
            .lock()
            .insert(frame.id(), Arc::clone(&texture));

        let back_buffers = Arc::downgrade(&self.back_buffers);
        frame.on_destroy(move |id| {
            if let Some(back_buffers) = back_buffers.upgrade() {
                back_buffers.lock().remove(&id);
            }
        });

        Some(CapturedInput { frame, texture })
    }

    /// Copy a captured texture (scaling if needed) into a fresh input frame.
    pub fn copy_from(&self, source: &dyn Texture, timestamp_us: i64) -> Option<CapturedInput> {
        let input = self.obtain_captured_input()?;
        if let Err(e) = self.gpu.copy_texture(source, input.texture.as_ref()) {
            tracing::error!("[EncoderContext] Texture copy failed: {}", e);
            return None;
        }
        input.frame.set_timestamp_us(timestamp_us);
        Some(input)
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(StreamError::Configuration(format!(
            "Encoder input must be non-empty, got {}x{}",
            width, height
        )));
    }
    Ok(())
}
