// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! castlib CLI
//!
//! Publishes a generated test pattern and test tone until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use castlib::core::video::{
    CpuDevice, CpuTexture, RenderTargetCapturer, Texture, TextureDescriptor, VideoCaptureSettings,
};
use castlib::{
    AudioSource, BitrateSettings, PublishSession, PublisherConfig, PublisherEvent,
    PublisherSource, RuntimeConfig, VideoCodecKind, WebRtcRuntime,
};
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "castlib")]
#[command(author, version, about = "Publish a test stream over WebRTC", long_about = None)]
struct Cli {
    /// Publisher config (YAML). Defaults to ./castlib.yaml when present.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stream name (overrides the config)
    #[arg(long)]
    stream_name: Option<String>,

    /// Publishing token (overrides the config)
    #[arg(long, env = "CASTLIB_PUBLISHING_TOKEN")]
    token: Option<String>,

    /// Director URL (overrides the config)
    #[arg(long)]
    stream_url: Option<String>,

    #[arg(long, value_enum)]
    codec: Option<CodecArg>,

    /// Publish three simulcast layers
    #[arg(long)]
    simulcast: bool,

    /// Maximum video bitrate in kbps
    #[arg(long)]
    max_kbps: Option<u32>,

    #[arg(long)]
    no_video: bool,

    #[arg(long)]
    no_audio: bool,

    /// Connect to this WebSocket directly instead of asking the director
    #[arg(long, requires = "jwt")]
    ws_url: Option<String>,

    /// JWT for --ws-url
    #[arg(long)]
    jwt: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Print the effective config and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CodecArg {
    Vp8,
    Vp9,
    H264,
}

impl From<CodecArg> for VideoCodecKind {
    fn from(codec: CodecArg) -> Self {
        match codec {
            CodecArg::Vp8 => VideoCodecKind::Vp8,
            CodecArg::Vp9 => VideoCodecKind::Vp9,
            CodecArg::H264 => VideoCodecKind::H264,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn setup_logging(log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".parse().unwrap());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .context("--log-file must name a file")?
                .to_owned();
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<PublisherConfig> {
    let mut config = match &cli.config {
        Some(path) => PublisherConfig::from_file(path)?,
        None => PublisherConfig::load_or_default(&std::env::current_dir()?),
    };

    if let Some(name) = &cli.stream_name {
        config.stream_name = name.clone();
    }
    if let Some(token) = &cli.token {
        config.publishing_token = token.clone();
    }
    if let Some(url) = &cli.stream_url {
        config.stream_url = url.clone();
    }
    if let Some(codec) = cli.codec {
        config.video_codec = codec.into();
    }
    if cli.simulcast {
        config.simulcast = true;
    }
    if let Some(max_kbps) = cli.max_kbps {
        let max_bps = max_kbps.saturating_mul(1000);
        config.bitrates = BitrateSettings::new(
            config.bitrates.min_bps.min(max_bps),
            config.bitrates.start_bps.min(max_bps),
            max_bps,
        );
    }
    if cli.no_video {
        config.capture_video = false;
    }
    if cli.no_audio {
        config.capture_audio = false;
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Test sources
// ---------------------------------------------------------------------------

/// Cycles the render target through solid colors, one per second.
fn spawn_test_pattern(
    capturer: Arc<Mutex<RenderTargetCapturer>>,
    target: Arc<CpuTexture>,
    fps: u32,
) -> tokio::task::JoinHandle<()> {
    const COLORS: [[u8; 4]; 4] = [
        [0x20, 0x20, 0xd0, 0xff],
        [0x20, 0xd0, 0x20, 0xff],
        [0xd0, 0x20, 0x20, 0xff],
        [0xd0, 0xd0, 0xd0, 0xff],
    ];
    let fps = fps.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
        let mut frame: u64 = 0;
        loop {
            ticker.tick().await;
            target.fill(COLORS[((frame / fps as u64) % COLORS.len() as u64) as usize]);
            capturer.lock().on_frame_rendered();
            frame += 1;
        }
    })
}

/// 440 Hz sine, 10 ms per push.
fn spawn_test_tone(source: Arc<AudioSource>, sample_rate: u32) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let frames = (sample_rate / 100) as usize;
        let step = 2.0 * std::f32::consts::PI * 440.0 / sample_rate as f32;
        let mut phase = 0.0f32;
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        let mut buffer = Vec::with_capacity(frames);
        loop {
            ticker.tick().await;
            buffer.clear();
            for _ in 0..frames {
                buffer.push(phase.sin() * 0.2);
                phase = (phase + step) % (2.0 * std::f32::consts::PI);
            }
            if let Err(e) = source.push(&buffer, sample_rate, 1) {
                tracing::warn!("Test tone push failed: {}", e);
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = setup_logging(cli.log_file.as_ref())?;

    let mut config = load_config(&cli)?;
    if cli.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let runtime = WebRtcRuntime::init(RuntimeConfig::default())?;

    if config.capture_video {
        if !runtime.encoder_factory().inner().can_encode(config.video_codec) {
            tracing::warn!(
                "No {} encoder available, publishing audio only",
                config.video_codec
            );
            config.capture_video = false;
        }
    }

    let mut tasks = Vec::new();
    let mut source = PublisherSource::new(config.clone());

    if config.capture_video {
        let desc = TextureDescriptor::new(config.video.width, config.video.height);
        let target = Arc::new(CpuTexture::new(desc));
        let settings = VideoCaptureSettings::new(
            Arc::new(CpuDevice::new()),
            config.video.width,
            config.video.height,
        )
        .with_fixed_resolution(config.video.fixed_resolution)
        .with_stats(runtime.stats());
        let capturer = Arc::new(Mutex::new(RenderTargetCapturer::new(
            settings,
            Arc::clone(&target) as Arc<dyn Texture>,
        )));
        source = source.with_video_source(capturer.clone());
        tasks.push(spawn_test_pattern(capturer, target, config.video.fps));
    }

    if config.capture_audio {
        let audio = Arc::new(AudioSource::new(&config.audio));
        source = source.with_audio_source(Arc::clone(&audio));
        tasks.push(spawn_test_tone(audio, config.audio.sample_rate));
    }

    let session = PublishSession::new(&runtime, source);
    let mut events = session.subscribe();
    tasks.push(tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PublisherEvent::AuthenticationFailure { status, body } => {
                    tracing::error!("Authentication failed [{}] {}", status, body)
                }
                PublisherEvent::PublishingError(reason) => tracing::error!("Publishing error: {}", reason),
                PublisherEvent::Publishing => tracing::info!("Publishing"),
                PublisherEvent::Active => tracing::info!("Stream active"),
                PublisherEvent::Inactive => tracing::info!("Stream inactive"),
                PublisherEvent::ViewerCount(count) => tracing::info!("Viewers: {}", count),
                PublisherEvent::Disconnected => {
                    tracing::warn!("Server closed the connection, press Ctrl-C to exit")
                }
            }
        }
    }));

    match (&cli.ws_url, &cli.jwt) {
        (Some(url), Some(jwt)) => session.publish_with_ws_and_jwt(url, jwt).await,
        _ => session.publish().await,
    }
    .context("Failed to publish")?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Stopping");

    session.unpublish();
    for task in tasks {
        task.abort();
    }
    runtime.stats().log_summary();
    drop(session);
    runtime.shutdown();
    Ok(())
}
