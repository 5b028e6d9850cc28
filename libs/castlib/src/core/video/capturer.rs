// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Video capture sources: render target, viewport and screen.

use super::source_adapter::VideoSourceAdapter;
use super::texture::{GpuDevice, Texture};
use crate::core::stats::PublisherStats;
use crate::core::streaming::VideoTrack;
use crate::core::{Result, StreamError};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Microseconds on a process-wide monotonic clock.
pub fn capture_clock_us() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

/// A source of video the publisher can start and stop.
pub trait VideoSource: Send {
    /// Begin capturing; the returned track is what gets published.
    fn start_capture(&mut self) -> Result<VideoTrack>;

    fn stop_capture(&mut self);

    fn track(&self) -> Option<VideoTrack>;

    fn is_capturing(&self) -> bool {
        self.track().is_some()
    }

    fn set_simulcast(&mut self, simulcast: bool);

    /// Only render-target sources can be retargeted.
    fn change_render_target(&mut self, _target: Arc<dyn Texture>) -> Result<()> {
        Err(StreamError::NotSupported(
            "This source does not capture a render target".into(),
        ))
    }
}

/// Shared settings of all capturers.
#[derive(Clone)]
pub struct VideoCaptureSettings {
    pub gpu: Arc<dyn GpuDevice>,
    pub width: u32,
    pub height: u32,
    pub simulcast: bool,
    pub fixed_resolution: bool,
    pub stats: Option<Arc<PublisherStats>>,
}

impl VideoCaptureSettings {
    pub fn new(gpu: Arc<dyn GpuDevice>, width: u32, height: u32) -> Self {
        Self {
            gpu,
            width,
            height,
            simulcast: false,
            fixed_resolution: false,
            stats: None,
        }
    }

    pub fn with_simulcast(mut self, simulcast: bool) -> Self {
        self.simulcast = simulcast;
        self
    }

    pub fn with_fixed_resolution(mut self, fixed: bool) -> Self {
        self.fixed_resolution = fixed;
        self
    }

    pub fn with_stats(mut self, stats: Arc<PublisherStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    fn build_adapter(&self, track: VideoTrack) -> Result<Arc<VideoSourceAdapter>> {
        let adapter = VideoSourceAdapter::new(
            Arc::clone(&self.gpu),
            self.width,
            self.height,
            self.simulcast,
            self.fixed_resolution,
            track,
        )?;
        Ok(Arc::new(match &self.stats {
            Some(stats) => adapter.with_stats(Arc::clone(stats)),
            None => adapter,
        }))
    }
}

fn new_video_track() -> VideoTrack {
    VideoTrack::new(
        format!("video-{}", uuid::Uuid::new_v4()),
        format!("castlib-{}", uuid::Uuid::new_v4()),
    )
}

/// Captures a render target every time the host finishes rendering into it.
pub struct RenderTargetCapturer {
    settings: VideoCaptureSettings,
    target: Arc<Mutex<Arc<dyn Texture>>>,
    adapter: Option<Arc<VideoSourceAdapter>>,
}

impl RenderTargetCapturer {
    pub fn new(settings: VideoCaptureSettings, target: Arc<dyn Texture>) -> Self {
        Self {
            settings,
            target: Arc::new(Mutex::new(target)),
            adapter: None,
        }
    }

    /// Point capture at a different render target.
    pub fn switch_target(&self, target: Arc<dyn Texture>) -> Result<()> {
        if self.settings.simulcast {
            return Err(StreamError::NotSupported(
                "Changing render target is not supported with simulcast".into(),
            ));
        }
        tracing::info!("[RenderTargetCapturer] Changing render target");
        *self.target.lock() = target;
        Ok(())
    }

    /// Called by the host at the end of each rendered frame.
    pub fn on_frame_rendered(&self) -> bool {
        let Some(adapter) = &self.adapter else {
            return false;
        };
        let target = Arc::clone(&*self.target.lock());
        adapter.on_frame_ready(target.as_ref(), capture_clock_us())
    }
}

impl VideoSource for RenderTargetCapturer {
    fn start_capture(&mut self) -> Result<VideoTrack> {
        if let Some(adapter) = &self.adapter {
            tracing::warn!("[RenderTargetCapturer] Already capturing");
            return Ok(adapter.track().clone());
        }
        let desc = self.target.lock().descriptor();
        let mut settings = self.settings.clone();
        settings.width = desc.width;
        settings.height = desc.height;
        let adapter = settings.build_adapter(new_video_track())?;
        let track = adapter.track().clone();
        self.adapter = Some(adapter);
        tracing::info!("[RenderTargetCapturer] Capture started ({}x{})", desc.width, desc.height);
        Ok(track)
    }

    fn stop_capture(&mut self) {
        if self.adapter.take().is_some() {
            tracing::info!("[RenderTargetCapturer] Capture stopped");
        }
    }

    fn track(&self) -> Option<VideoTrack> {
        self.adapter.as_ref().map(|a| a.track().clone())
    }

    fn set_simulcast(&mut self, simulcast: bool) {
        self.settings.simulcast = simulcast;
    }

    fn change_render_target(&mut self, target: Arc<dyn Texture>) -> Result<()> {
        self.switch_target(target)
    }
}

/// Captures the host's viewport back buffer whenever one is presented.
pub struct ViewportCapturer {
    settings: VideoCaptureSettings,
    adapter: Option<Arc<VideoSourceAdapter>>,
}

impl ViewportCapturer {
    pub fn new(settings: VideoCaptureSettings) -> Self {
        Self {
            settings,
            adapter: None,
        }
    }

    pub fn on_back_buffer_ready(&self, back_buffer: &dyn Texture) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.on_frame_ready(back_buffer, capture_clock_us()),
            None => false,
        }
    }
}

impl VideoSource for ViewportCapturer {
    fn start_capture(&mut self) -> Result<VideoTrack> {
        if let Some(adapter) = &self.adapter {
            tracing::warn!("[ViewportCapturer] Already capturing");
            return Ok(adapter.track().clone());
        }
        let adapter = self.settings.build_adapter(new_video_track())?;
        let track = adapter.track().clone();
        self.adapter = Some(adapter);
        tracing::info!("[ViewportCapturer] Capture started");
        Ok(track)
    }

    fn stop_capture(&mut self) {
        if self.adapter.take().is_some() {
            tracing::info!("[ViewportCapturer] Capture stopped");
        }
    }

    fn track(&self) -> Option<VideoTrack> {
        self.adapter.as_ref().map(|a| a.track().clone())
    }

    fn set_simulcast(&mut self, simulcast: bool) {
        self.settings.simulcast = simulcast;
    }
}

/// Platform desktop grabber polled by [`ScreenCapturer`].
pub trait ScreenSource: Send {
    /// Grab the current desktop image, `None` when nothing changed.
    fn capture(&mut self) -> Result<Option<Arc<dyn Texture>>>;
}

/// Polls a [`ScreenSource`] at a fixed rate on a tokio task.
pub struct ScreenCapturer {
    settings: VideoCaptureSettings,
    fps: u32,
    source: Arc<Mutex<Box<dyn ScreenSource>>>,
    handle: tokio::runtime::Handle,
    adapter: Option<Arc<VideoSourceAdapter>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ScreenCapturer {
    pub fn new(
        settings: VideoCaptureSettings,
        fps: u32,
        source: Box<dyn ScreenSource>,
        handle: tokio::runtime::Handle,
    ) -> Self {
        Self {
            settings,
            fps: fps.max(1),
            source: Arc::new(Mutex::new(source)),
            handle,
            adapter: None,
            task: None,
        }
    }
}

impl VideoSource for ScreenCapturer {
    fn start_capture(&mut self) -> Result<VideoTrack> {
        if let Some(adapter) = &self.adapter {
            tracing::warn!("[ScreenCapturer] Already capturing");
            return Ok(adapter.track().clone());
        }

        let adapter = self.settings.build_adapter(new_video_track())?;
        let track = adapter.track().clone();
        let source = Arc::clone(&self.source);
        let task_adapter = Arc::clone(&adapter);
        let period = Duration::from_secs_f64(1.0 / self.fps as f64);

        self.task = Some(self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let grabbed = source.lock().capture();
                match grabbed {
                    Ok(Some(texture)) => {
                        task_adapter.on_frame_ready(texture.as_ref(), capture_clock_us());
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("[ScreenCapturer] Capture failed: {}", e),
                }
            }
        }));
        self.adapter = Some(adapter);
        tracing::info!("[ScreenCapturer] Capture started at {} fps", self.fps);
        Ok(track)
    }

    fn stop_capture(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.adapter.take().is_some() {
            tracing::info!("[ScreenCapturer] Capture stopped");
        }
    }

    fn track(&self) -> Option<VideoTrack> {
        self.adapter.as_ref().map(|a| a.track().clone())
    }

    fn set_simulcast(&mut self, simulcast: bool) {
        self.settings.simulcast = simulcast;
    }
}

impl Drop for ScreenCapturer {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::streaming::VideoSink;
    use crate::core::video::frame_buffer::VideoFrame;
    use crate::core::video::texture::{CpuDevice, CpuTexture, TextureDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl VideoSink for Count {
        fn on_frame(&self, _frame: &VideoFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn settings() -> VideoCaptureSettings {
        VideoCaptureSettings::new(Arc::new(CpuDevice::new()), 320, 240)
    }

    #[test]
    fn test_render_target_frames_flow_only_while_capturing() {
        let target: Arc<dyn Texture> = Arc::new(CpuTexture::new(TextureDescriptor::new(320, 240)));
        let mut capturer = RenderTargetCapturer::new(settings(), target);
        assert!(!capturer.on_frame_rendered());

        let track = capturer.start_capture().unwrap();
        let sink = Arc::new(Count::default());
        track.add_sink(sink.clone());
        assert!(capturer.on_frame_rendered());

        capturer.stop_capture();
        assert!(!capturer.is_capturing());
        assert!(!capturer.on_frame_rendered());
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_switch_target_rejected_with_simulcast() {
        let target: Arc<dyn Texture> = Arc::new(CpuTexture::new(TextureDescriptor::new(320, 240)));
        let capturer = RenderTargetCapturer::new(settings().with_simulcast(true), Arc::clone(&target));
        assert!(capturer.switch_target(target).is_err());
    }

    #[test]
    fn test_double_start_returns_same_track() {
        let mut capturer = ViewportCapturer::new(settings());
        let first = capturer.start_capture().unwrap();
        let second = capturer.start_capture().unwrap();
        assert!(first.ptr_eq(&second));
    }

    struct StaticScreen(Arc<dyn Texture>);

    impl ScreenSource for StaticScreen {
        fn capture(&mut self) -> Result<Option<Arc<dyn Texture>>> {
            Ok(Some(Arc::clone(&self.0)))
        }
    }

    #[tokio::test]
    async fn test_screen_capturer_polls_source() {
        let texture: Arc<dyn Texture> = Arc::new(CpuTexture::new(TextureDescriptor::new(64, 64)));
        let mut capturer = ScreenCapturer::new(
            settings(),
            100,
            Box::new(StaticScreen(texture)),
            tokio::runtime::Handle::current(),
        );
        let track = capturer.start_capture().unwrap();
        let sink = Arc::new(Count::default());
        track.add_sink(sink.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        capturer.stop_capture();
        let seen = sink.0.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {} frames", seen);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), seen);
    }
}
