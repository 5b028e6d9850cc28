// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Peer connection engine seam
//
// `PeerConnectionBackend` is everything the negotiation wrapper needs from
// the WebRTC engine. `WebRtcBackend` implements it over webrtc-rs; tests
// substitute a scripted backend.

use super::configuration::{RtcConfiguration, RtpEncoding};
use super::description::SessionDescription;
use crate::core::codec::VideoCodecKind;
use crate::core::streaming::SampleWriter;
use crate::core::{Result, StreamError};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::API;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        }
    }
}

pub type ConnectionStateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Operations the negotiation wrapper drives on the engine.
pub trait PeerConnectionBackend: Send + Sync {
    /// Adds a send-only video transceiver. Returns one writer per encoding,
    /// in encoding order.
    fn add_video_track<'a>(
        &'a self,
        codec: VideoCodecKind,
        encodings: &'a [RtpEncoding],
        track_id: &'a str,
        stream_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Arc<dyn SampleWriter>>>>;

    fn add_audio_track<'a>(
        &'a self,
        track_id: &'a str,
        stream_id: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn SampleWriter>>>;

    /// Produces the raw offer SDP without applying it.
    fn create_offer(&self) -> BoxFuture<'_, Result<String>>;

    fn set_local_description(&self, desc: SessionDescription) -> BoxFuture<'_, Result<()>>;

    /// Local description as applied, including gathered candidates.
    fn local_description(&self) -> BoxFuture<'_, Option<String>>;

    fn set_remote_description(&self, desc: SessionDescription) -> BoxFuture<'_, Result<()>>;

    fn on_connection_state_change(&self, callback: ConnectionStateCallback);

    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Creates peer connections from the process-wide engine.
pub trait PeerConnectionFactory: Send + Sync {
    fn create_peer_connection<'a>(
        &'a self,
        config: &'a RtcConfiguration,
    ) -> BoxFuture<'a, Result<Arc<dyn PeerConnectionBackend>>>;
}

pub struct WebRtcBackend {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcBackend {
    pub async fn new(api: &API, config: &RtcConfiguration) -> Result<Self> {
        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            StreamError::Configuration(format!("Failed to create PeerConnection: {}", e))
        })?);

        peer_connection.on_signaling_state_change(Box::new(move |state| {
            Box::pin(async move {
                tracing::debug!("[PeerConnection] Signaling state: {:?}", state);
            })
        }));
        peer_connection.on_ice_gathering_state_change(Box::new(move |state| {
            Box::pin(async move {
                tracing::debug!("[PeerConnection] ICE gathering state: {:?}", state);
            })
        }));
        peer_connection.on_ice_connection_state_change(Box::new(move |state| {
            Box::pin(async move {
                tracing::info!("[PeerConnection] ICE connection state: {:?}", state);
            })
        }));

        tracing::debug!(
            "[PeerConnection] Created with {} ICE server(s)",
            config.ice_servers.len()
        );

        Ok(Self { peer_connection })
    }

    async fn make_send_only(&self) {
        for transceiver in self.peer_connection.get_transceivers().await {
            if transceiver.sender().await.track().await.is_some() {
                transceiver
                    .set_direction(RTCRtpTransceiverDirection::Sendonly)
                    .await;
            }
        }
    }
}

/// Drains RTCP so interceptors (NACK, reports) keep running.
fn spawn_rtcp_reader(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}

fn video_capability(codec: VideoCodecKind) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type().to_owned(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: codec.sdp_fmtp_line(),
        rtcp_feedback: vec![],
    }
}

fn audio_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: webrtc::api::media_engine::MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

impl PeerConnectionBackend for WebRtcBackend {
    fn add_video_track<'a>(
        &'a self,
        codec: VideoCodecKind,
        encodings: &'a [RtpEncoding],
        track_id: &'a str,
        stream_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Arc<dyn SampleWriter>>>> {
        Box::pin(async move {
            let capability = video_capability(codec);
            let tracks: Vec<Arc<TrackLocalStaticSample>> = match encodings {
                [] | [RtpEncoding { rid: None, .. }] => {
                    vec![Arc::new(TrackLocalStaticSample::new(
                        capability,
                        track_id.to_owned(),
                        stream_id.to_owned(),
                    ))]
                }
                layers => layers
                    .iter()
                    .map(|encoding| {
                        Arc::new(TrackLocalStaticSample::new_with_rid(
                            capability.clone(),
                            track_id.to_owned(),
                            encoding.rid.clone().unwrap_or_default(),
                            stream_id.to_owned(),
                        ))
                    })
                    .collect(),
            };

            let Some((first, rest)) = tracks.split_first() else {
                return Err(StreamError::Configuration("No video encodings".into()));
            };
            let sender = self
                .peer_connection
                .add_track(Arc::clone(first) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| StreamError::Configuration(format!("Failed to add video track: {}", e)))?;
            for track in rest {
                sender
                    .add_encoding(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(|e| {
                        StreamError::Configuration(format!("Failed to add simulcast encoding: {}", e))
                    })?;
            }
            spawn_rtcp_reader(sender);
            self.make_send_only().await;

            for encoding in encodings {
                tracing::debug!(
                    "[PeerConnection] Video encoding rid={:?} max={}bps scale={}",
                    encoding.rid,
                    encoding.max_bitrate_bps,
                    encoding.scale_resolution_down_by
                );
            }
            tracing::info!(
                "[PeerConnection] Added {} video track with {} encoding(s)",
                codec,
                tracks.len()
            );

            Ok(tracks
                .into_iter()
                .map(|track| track as Arc<dyn SampleWriter>)
                .collect())
        })
    }

    fn add_audio_track<'a>(
        &'a self,
        track_id: &'a str,
        stream_id: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn SampleWriter>>> {
        Box::pin(async move {
            let track = Arc::new(TrackLocalStaticSample::new(
                audio_capability(),
                track_id.to_owned(),
                stream_id.to_owned(),
            ));
            let sender = self
                .peer_connection
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| StreamError::Configuration(format!("Failed to add audio track: {}", e)))?;
            spawn_rtcp_reader(sender);
            self.make_send_only().await;
            tracing::info!("[PeerConnection] Added opus audio track");
            Ok(track as Arc<dyn SampleWriter>)
        })
    }

    fn create_offer(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let offer = self
                .peer_connection
                .create_offer(None)
                .await
                .map_err(|e| StreamError::Negotiation(format!("Failed to create offer: {}", e)))?;
            Ok(offer.sdp)
        })
    }

    fn set_local_description(&self, desc: SessionDescription) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let rtc = desc.to_rtc()?;
            let mut gathered = self.peer_connection.gathering_complete_promise().await;
            self.peer_connection
                .set_local_description(rtc)
                .await
                .map_err(|e| {
                    StreamError::Negotiation(format!("Failed to set local description: {}", e))
                })?;
            if tokio::time::timeout(GATHERING_TIMEOUT, gathered.recv())
                .await
                .is_err()
            {
                tracing::warn!(
                    "[PeerConnection] ICE gathering incomplete after {:?}, sending partial candidates",
                    GATHERING_TIMEOUT
                );
            }
            Ok(())
        })
    }

    fn local_description(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            self.peer_connection
                .local_description()
                .await
                .map(|desc| desc.sdp)
        })
    }

    fn set_remote_description(&self, desc: SessionDescription) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let rtc = desc.to_rtc()?;
            self.peer_connection
                .set_remote_description(rtc)
                .await
                .map_err(|e| {
                    StreamError::Negotiation(format!("Failed to set remote description: {}", e))
                })
        })
    }

    fn on_connection_state_change(&self, callback: ConnectionStateCallback) {
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state| {
                let callback = Arc::clone(&callback);
                Box::pin(async move {
                    tracing::info!("[PeerConnection] Connection state: {:?}", state);
                    callback(state.into());
                })
            }));
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.peer_connection
                .close()
                .await
                .map_err(|e| StreamError::Runtime(format!("Failed to close PeerConnection: {}", e)))
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::core::peer_connection::description::TEST_OFFER;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use webrtc::media::Sample;

    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub samples: Mutex<Vec<usize>>,
    }

    impl SampleWriter for RecordingWriter {
        fn write_sample<'a>(&'a self, sample: &'a Sample) -> BoxFuture<'a, Result<()>> {
            self.samples.lock().push(sample.data.len());
            Box::pin(async { Ok(()) })
        }
    }

    /// Engine double that answers every call from a script.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        pub fail_create_offer: AtomicBool,
        pub fail_set_local: AtomicBool,
        pub fail_set_remote: AtomicBool,
        pub calls: Mutex<Vec<String>>,
        pub local: Mutex<Option<String>>,
        pub remote: Mutex<Option<String>>,
        pub video_encodings: Mutex<Vec<RtpEncoding>>,
        pub video_writers: Mutex<Vec<Arc<RecordingWriter>>>,
        pub audio_writer: Mutex<Option<Arc<RecordingWriter>>>,
        pub closed: AtomicBool,
        pub state_callback: Mutex<Option<ConnectionStateCallback>>,
    }

    impl ScriptedBackend {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn emit(&self, state: ConnectionState) {
            let callback = self.state_callback.lock().clone();
            if let Some(callback) = callback {
                callback(state);
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().push(call.to_owned());
        }
    }

    impl PeerConnectionBackend for ScriptedBackend {
        fn add_video_track<'a>(
            &'a self,
            _codec: VideoCodecKind,
            encodings: &'a [RtpEncoding],
            _track_id: &'a str,
            _stream_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Arc<dyn SampleWriter>>>> {
            Box::pin(async move {
                self.record("add_video_track");
                *self.video_encodings.lock() = encodings.to_vec();
                let writers: Vec<Arc<RecordingWriter>> = encodings
                    .iter()
                    .map(|_| Arc::new(RecordingWriter::default()))
                    .collect();
                *self.video_writers.lock() = writers.clone();
                Ok(writers
                    .into_iter()
                    .map(|w| w as Arc<dyn SampleWriter>)
                    .collect())
            })
        }

        fn add_audio_track<'a>(
            &'a self,
            _track_id: &'a str,
            _stream_id: &'a str,
        ) -> BoxFuture<'a, Result<Arc<dyn SampleWriter>>> {
            Box::pin(async move {
                self.record("add_audio_track");
                let writer = Arc::new(RecordingWriter::default());
                *self.audio_writer.lock() = Some(Arc::clone(&writer));
                Ok(writer as Arc<dyn SampleWriter>)
            })
        }

        fn create_offer(&self) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move {
                self.record("create_offer");
                if self.fail_create_offer.load(Ordering::SeqCst) {
                    return Err(StreamError::Negotiation("scripted failure".into()));
                }
                Ok(TEST_OFFER.to_owned())
            })
        }

        fn set_local_description(&self, desc: SessionDescription) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.record("set_local_description");
                if self.fail_set_local.load(Ordering::SeqCst) {
                    return Err(StreamError::Negotiation("scripted failure".into()));
                }
                *self.local.lock() = Some(desc.into_sdp());
                Ok(())
            })
        }

        fn local_description(&self) -> BoxFuture<'_, Option<String>> {
            Box::pin(async move { self.local.lock().clone() })
        }

        fn set_remote_description(&self, desc: SessionDescription) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.record("set_remote_description");
                if self.fail_set_remote.load(Ordering::SeqCst) {
                    return Err(StreamError::Negotiation("scripted failure".into()));
                }
                *self.remote.lock() = Some(desc.into_sdp());
                Ok(())
            })
        }

        fn on_connection_state_change(&self, callback: ConnectionStateCallback) {
            *self.state_callback.lock() = Some(callback);
        }

        fn close(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.record("close");
                self.closed.store(true, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    /// Hands out one shared scripted backend.
    pub(crate) struct ScriptedFactory {
        pub backend: Arc<ScriptedBackend>,
        pub configs: Mutex<Vec<RtcConfiguration>>,
    }

    impl ScriptedFactory {
        pub fn new() -> Self {
            Self {
                backend: Arc::new(ScriptedBackend::default()),
                configs: Mutex::new(Vec::new()),
            }
        }
    }

    impl PeerConnectionFactory for ScriptedFactory {
        fn create_peer_connection<'a>(
            &'a self,
            config: &'a RtcConfiguration,
        ) -> BoxFuture<'a, Result<Arc<dyn PeerConnectionBackend>>> {
            Box::pin(async move {
                self.configs.lock().push(config.clone());
                Ok(Arc::clone(&self.backend) as Arc<dyn PeerConnectionBackend>)
            })
        }
    }
}
