// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// WebRTC runtime
//
// Process-wide publishing context: the signaling runtime, the audio pacing
// runtime, the webrtc-rs engine and the shared audio transport. Created once
// with `init`, shared by cloning, torn down with `shutdown`.

use crate::core::audio::AudioTransport;
use crate::core::codec::{
    HardwareEncoderRegistry, SimulcastEncoderFactory, SoftwareEncoderProvider, VideoCodecKind,
    VideoEncoderFactory,
};
use crate::core::peer_connection::{
    PeerConnectionBackend, PeerConnectionFactory, RtcConfiguration, WebRtcBackend,
};
use crate::core::stats::PublisherStats;
use crate::core::video::GpuDescriptor;
use crate::core::{Result, StreamError};
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::{Handle, Runtime};
use webrtc::api::API;
use webrtc::api::media_engine::MediaEngine;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTCRtpHeaderExtensionCapability, RTPCodecType,
};

const OPUS_PAYLOAD_TYPE: u8 = 111;

/// RTP header extensions needed to carry simulcast rids.
const SIMULCAST_EXTENSIONS: [&str; 3] = [
    "urn:ietf:params:rtp-hdrext:sdes:mid",
    "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id",
    "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id",
];

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub signaling_threads: usize,
    /// GPU used by capture; selects hardware encoder backends.
    pub gpu: GpuDescriptor,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            signaling_threads: 2,
            gpu: GpuDescriptor::cpu(),
        }
    }
}

struct RuntimeInner {
    signaling_runtime: Mutex<Option<Runtime>>,
    audio_runtime: Mutex<Option<Runtime>>,
    signaling: Handle,
    audio: Handle,
    api: API,
    transport: AudioTransport,
    stats: Arc<PublisherStats>,
    gpu: GpuDescriptor,
    hardware: Arc<HardwareEncoderRegistry>,
    software: RwLock<Vec<Arc<dyn SoftwareEncoderProvider>>>,
    shut_down: AtomicBool,
}

impl RuntimeInner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.stop_recording();
        self.transport.register_callback(None);
        // shutdown_background is safe from inside another runtime.
        if let Some(runtime) = self.audio_runtime.lock().take() {
            runtime.shutdown_background();
        }
        if let Some(runtime) = self.signaling_runtime.lock().take() {
            runtime.shutdown_background();
        }
        tracing::info!("[Runtime] Shut down");
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
pub struct WebRtcRuntime {
    inner: Arc<RuntimeInner>,
}

impl WebRtcRuntime {
    pub fn init(config: RuntimeConfig) -> Result<Self> {
        let signaling_runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.signaling_threads.max(1))
            .thread_name("castlib-signaling")
            .enable_all()
            .build()
            .map_err(|e| StreamError::Runtime(format!("Failed to create signaling runtime: {}", e)))?;
        let audio_runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("castlib-audio")
            .enable_time()
            .build()
            .map_err(|e| StreamError::Runtime(format!("Failed to create audio runtime: {}", e)))?;

        let api = build_api()?;
        let software: Vec<Arc<dyn SoftwareEncoderProvider>> = default_software_providers();

        tracing::info!(
            "[Runtime] Initialized ({} signaling threads, GPU {:?}, {} software encoder(s))",
            config.signaling_threads.max(1),
            config.gpu,
            software.len()
        );

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                signaling: signaling_runtime.handle().clone(),
                audio: audio_runtime.handle().clone(),
                signaling_runtime: Mutex::new(Some(signaling_runtime)),
                audio_runtime: Mutex::new(Some(audio_runtime)),
                api,
                transport: AudioTransport::new(),
                stats: Arc::new(PublisherStats::new()),
                gpu: config.gpu,
                hardware: Arc::new(HardwareEncoderRegistry::new()),
                software: RwLock::new(software),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Stops the transport and both runtimes. Further calls do nothing.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Handle of the signaling runtime; all negotiation work runs there.
    pub fn signaling(&self) -> &Handle {
        &self.inner.signaling
    }

    /// Handle of the runtime that paces audio delivery.
    pub fn audio(&self) -> &Handle {
        &self.inner.audio
    }

    pub fn audio_transport(&self) -> &AudioTransport {
        &self.inner.transport
    }

    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.inner.stats)
    }

    pub fn hardware_encoders(&self) -> Arc<HardwareEncoderRegistry> {
        Arc::clone(&self.inner.hardware)
    }

    pub fn register_software_encoder(&self, provider: Arc<dyn SoftwareEncoderProvider>) {
        tracing::info!("[Runtime] Registered software encoder '{}'", provider.name());
        self.inner.software.write().push(provider);
    }

    pub fn encoder_factory(&self) -> SimulcastEncoderFactory {
        let factory = self
            .inner
            .software
            .read()
            .iter()
            .fold(
                VideoEncoderFactory::new(self.inner.gpu, Arc::clone(&self.inner.hardware)),
                |factory, provider| factory.with_software_provider(Arc::clone(provider)),
            )
            .with_stats(Arc::clone(&self.inner.stats));
        SimulcastEncoderFactory::new(factory)
    }
}

impl PeerConnectionFactory for WebRtcRuntime {
    fn create_peer_connection<'a>(
        &'a self,
        config: &'a RtcConfiguration,
    ) -> BoxFuture<'a, Result<Arc<dyn PeerConnectionBackend>>> {
        Box::pin(async move {
            if self.is_shut_down() {
                return Err(StreamError::InvalidState("Runtime is shut down".into()));
            }
            let backend = WebRtcBackend::new(&self.inner.api, config).await?;
            Ok(Arc::new(backend) as Arc<dyn PeerConnectionBackend>)
        })
    }
}

#[cfg(feature = "openh264")]
fn default_software_providers() -> Vec<Arc<dyn SoftwareEncoderProvider>> {
    vec![Arc::new(crate::core::codec::OpenH264Provider)]
}

#[cfg(not(feature = "openh264"))]
fn default_software_providers() -> Vec<Arc<dyn SoftwareEncoderProvider>> {
    Vec::new()
}

fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();

    for codec in [VideoCodecKind::Vp8, VideoCodecKind::Vp9, VideoCodecKind::H264] {
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: codec.mime_type().to_owned(),
                        clock_rate: 90000,
                        channels: 0,
                        sdp_fmtp_line: codec.sdp_fmtp_line(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: codec.rtp_payload_type(),
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| StreamError::Configuration(format!("Failed to register {} codec: {}", codec, e)))?;
    }

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: webrtc::api::media_engine::MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: OPUS_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| StreamError::Configuration(format!("Failed to register Opus codec: {}", e)))?;

    for uri in SIMULCAST_EXTENSIONS {
        media_engine
            .register_header_extension(
                RTCRtpHeaderExtensionCapability {
                    uri: uri.to_owned(),
                },
                RTPCodecType::Video,
                None,
            )
            .map_err(|e| {
                StreamError::Configuration(format!("Failed to register header extension {}: {}", uri, e))
            })?;
    }

    tracing::debug!("[Runtime] Registered VP8 (96), VP9 (98), H264 (102) and Opus (111)");

    let mut registry = webrtc::interceptor::registry::Registry::new();
    registry = webrtc::api::interceptor_registry::register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| StreamError::Configuration(format!("Failed to register interceptors: {}", e)))?;

    Ok(webrtc::api::APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_idempotent_shutdown() {
        let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
        let clone = runtime.clone();
        assert!(!runtime.is_shut_down());

        runtime.shutdown();
        clone.shutdown();
        assert!(clone.is_shut_down());
        assert!(!runtime.audio_transport().is_recording());
    }

    #[test]
    fn test_encoder_factory_without_providers() {
        let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
        let factory = runtime.encoder_factory();
        assert!(runtime.hardware_encoders().is_empty());
        if cfg!(feature = "openh264") {
            assert!(factory.inner().can_encode(VideoCodecKind::H264));
        }
        assert!(!factory.inner().can_encode(VideoCodecKind::Vp9));
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_inside_async_context() {
        let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
        drop(runtime);
    }

    #[tokio::test]
    async fn test_peer_connection_refused_after_shutdown() {
        let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
        runtime.shutdown();
        let result = runtime
            .create_peer_connection(&RtcConfiguration::default())
            .await;
        assert!(matches!(result, Err(StreamError::InvalidState(_))));
    }
}
