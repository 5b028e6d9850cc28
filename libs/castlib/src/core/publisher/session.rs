// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Publish session
//
// Orchestrates one publish: director auth, WebSocket, peer connection,
// capture and encoders. All negotiation runs on the runtime's signaling
// handle. Every attempt carries a generation number; `unpublish` bumps it,
// and work from an older generation cleans up after itself and stays silent.

use super::source::PublisherSource;
use crate::core::codec::{preferred_format, VideoEncoderConfig};
use crate::core::config::BitrateSettings;
use crate::core::peer_connection::{
    sdp, ConnectionState, PeerConnection, PeerConnectionFactory, RtcConfiguration,
    SessionDescriptionExchange,
};
use crate::core::runtime::WebRtcRuntime;
use crate::core::signaling::{
    parse_viewer_count, DirectorClient, EventCallbackTable, IceServer, PublishCommand,
    SignalingMessage, SignalingSocket, SocketEvent, EVENT_ACTIVE, EVENT_INACTIVE,
    EVENT_VIEWER_COUNT,
};
use crate::core::streaming::{
    AudioEncoderConfig, FrameTransformer, OpusSink, UserDataCallback, VideoSender, VideoSink,
    VideoTrack,
};
use crate::core::video::SIMULCAST_LAYERS;
use crate::core::{Result, StreamError, VideoCodecKind};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub const WEBSOCKET_CLOSED_ERROR: &str = "Websocket is closed. Can not send SDP to server.";

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Disconnected,
    Connecting,
    Publishing,
}

/// Notifications delivered to `subscribe()` receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherEvent {
    /// The director refused the publish. `status` is 0 when no HTTP answer arrived.
    AuthenticationFailure { status: u16, body: String },
    Publishing,
    PublishingError(String),
    /// First viewer joined.
    Active,
    /// Last viewer left.
    Inactive,
    ViewerCount(i64),
    /// The server closed the WebSocket. The session is back to
    /// `Disconnected` and `publish` may be called again.
    Disconnected,
}

struct VideoPipeline {
    track: VideoTrack,
    sink: Arc<dyn VideoSink>,
    sender: VideoSender,
}

/// Everything one publish attempt holds on to.
#[derive(Default)]
struct Connection {
    peer: Option<Arc<PeerConnection>>,
    socket: Option<Arc<SignalingSocket>>,
    video: Option<VideoPipeline>,
    audio_attached: bool,
    capturing: bool,
    message_task: Option<JoinHandle<()>>,
    publisher_id: Option<String>,
    cluster_id: Option<String>,
}

impl Connection {
    fn is_empty(&self) -> bool {
        self.peer.is_none()
            && self.socket.is_none()
            && self.video.is_none()
            && !self.audio_attached
            && !self.capturing
            && self.message_task.is_none()
    }
}

struct SessionInner {
    runtime: WebRtcRuntime,
    factory: RwLock<Arc<dyn PeerConnectionFactory>>,
    director_timeout: RwLock<Duration>,
    frame_metadata: RwLock<Option<UserDataCallback>>,
    source: Mutex<PublisherSource>,
    state: Mutex<PublishState>,
    connection: Mutex<Connection>,
    generation: AtomicU64,
    events: broadcast::Sender<PublisherEvent>,
    event_table: EventCallbackTable,
}

pub struct PublishSession {
    inner: Arc<SessionInner>,
}

impl PublishSession {
    pub fn new(runtime: &WebRtcRuntime, source: PublisherSource) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| SessionInner {
            runtime: runtime.clone(),
            factory: RwLock::new(Arc::new(runtime.clone())),
            director_timeout: RwLock::new(crate::core::signaling::DIRECTOR_TIMEOUT),
            frame_metadata: RwLock::new(None),
            source: Mutex::new(source),
            state: Mutex::new(PublishState::Disconnected),
            connection: Mutex::new(Connection::default()),
            generation: AtomicU64::new(0),
            events,
            event_table: default_event_table(weak.clone()),
        });
        Self { inner }
    }

    /// Replaces the engine used to create peer connections.
    pub fn with_peer_connection_factory(self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        *self.inner.factory.write() = factory;
        self
    }

    pub fn with_director_timeout(self, timeout: Duration) -> Self {
        *self.inner.director_timeout.write() = timeout;
        self
    }

    /// Appends the callback's user data to every encoded video frame.
    pub fn with_frame_metadata(self, callback: UserDataCallback) -> Self {
        *self.inner.frame_metadata.write() = Some(callback);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublisherEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> PublishState {
        *self.inner.state.lock()
    }

    pub fn is_publishing(&self) -> bool {
        self.state() == PublishState::Publishing
    }

    pub fn publisher_id(&self) -> Option<String> {
        self.inner.connection.lock().publisher_id.clone()
    }

    pub fn cluster_id(&self) -> Option<String> {
        self.inner.connection.lock().cluster_id.clone()
    }

    /// Runs `f` with the session's source.
    pub fn with_source<R>(&self, f: impl FnOnce(&mut PublisherSource) -> R) -> R {
        f(&mut self.inner.source.lock())
    }

    /// Authenticates with the director, then connects and negotiates. Failures
    /// are returned and also delivered as events. Calling this while a
    /// publish is underway logs a warning and does nothing.
    pub async fn publish(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .runtime
            .signaling()
            .spawn(inner.publish())
            .await
            .map_err(|e| StreamError::Runtime(format!("Publish task failed: {}", e)))?
    }

    /// Skips the director and connects straight to `url` with `jwt`.
    pub async fn publish_with_ws_and_jwt(&self, url: &str, jwt: &str) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let (url, jwt) = (url.to_owned(), jwt.to_owned());
        self.inner
            .runtime
            .signaling()
            .spawn(async move {
                let Some(generation) = inner.begin()? else {
                    return Ok(());
                };
                inner.connect(generation, &url, &jwt, Vec::new()).await
            })
            .await
            .map_err(|e| StreamError::Runtime(format!("Publish task failed: {}", e)))?
    }

    /// Stops encoders and capture, closes the peer connection, then the
    /// WebSocket. No event fires afterwards. Safe to call at any time.
    pub fn unpublish(&self) {
        self.inner.unpublish();
    }

    /// Rejected while a publish is underway.
    pub fn set_bitrates(&self, bitrates: BitrateSettings) -> Result<()> {
        self.inner.ensure_idle("change bitrates")?;
        bitrates.validate()?;
        self.inner.source.lock().config_mut().bitrates = bitrates;
        tracing::info!(
            "[PublishSession] Bitrates set to {}/{}/{} bps",
            bitrates.min_bps,
            bitrates.start_bps,
            bitrates.max_bps
        );
        Ok(())
    }

    /// Rejected while a publish is underway. Codecs without simulcast
    /// support turn simulcast off.
    pub fn set_video_codec(&self, codec: VideoCodecKind) -> Result<()> {
        self.inner.ensure_idle("change the video codec")?;
        let mut source = self.inner.source.lock();
        let config = source.config_mut();
        config.video_codec = codec;
        if config.simulcast && !codec.supports_simulcast() {
            tracing::warn!("[PublishSession] {} does not support simulcast, disabling it", codec);
            config.simulcast = false;
        }
        tracing::info!("[PublishSession] Video codec set to {}", codec);
        Ok(())
    }

    pub fn mute_video(&self, muted: bool) {
        self.inner.source.lock().mute_video(muted);
    }

    pub fn mute_audio(&self, muted: bool) {
        self.inner.source.lock().mute_audio(muted);
    }
}

impl Drop for PublishSession {
    fn drop(&mut self) {
        self.inner.unpublish();
    }
}

impl SessionInner {
    fn emit(&self, event: PublisherEvent) {
        tracing::debug!("[PublishSession] Event: {:?}", event);
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        if *self.state.lock() != PublishState::Disconnected {
            return Err(StreamError::InvalidState(format!(
                "Can not {} while publishing",
                action
            )));
        }
        Ok(())
    }

    /// Validates and moves to `Connecting`. `None` means a publish is
    /// already underway.
    fn begin(&self) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        if *state != PublishState::Disconnected {
            tracing::warn!("[PublishSession] Already publishing or connecting");
            return Ok(None);
        }
        self.source.lock().validate()?;
        *state = PublishState::Connecting;
        Ok(Some(self.generation.fetch_add(1, Ordering::AcqRel) + 1))
    }

    async fn publish(self: Arc<Self>) -> Result<()> {
        let Some(generation) = self.begin()? else {
            return Ok(());
        };

        let credentials = self.source.lock().credentials();
        let timeout = *self.director_timeout.read();
        let result = match DirectorClient::new() {
            Ok(client) => client.with_timeout(timeout).publish(&credentials).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                self.connect(generation, &response.ws_url, &response.jwt, response.ice_servers)
                    .await
            }
            Err(e) => {
                if self.is_current(generation) {
                    match &e {
                        StreamError::Authentication { status, body } => {
                            self.emit(PublisherEvent::AuthenticationFailure {
                                status: *status,
                                body: body.clone(),
                            });
                        }
                        other => self.emit(PublisherEvent::PublishingError(reason(other))),
                    }
                    self.teardown();
                }
                Err(e)
            }
        }
    }

    async fn connect(
        self: &Arc<Self>,
        generation: u64,
        url: &str,
        jwt: &str,
        ice_servers: Vec<IceServer>,
    ) -> Result<()> {
        let result = self.establish(generation, url, jwt, ice_servers).await;
        if let Err(e) = &result {
            if self.is_current(generation) {
                tracing::error!("[PublishSession] Publish failed: {}", e);
                self.emit(PublisherEvent::PublishingError(reason(e)));
                self.teardown();
            }
        }
        result
    }

    /// Stores a freshly created resource, or releases it at once if the
    /// attempt was cancelled meanwhile.
    fn stash(&self, generation: u64, store: impl FnOnce(&mut Connection)) -> Result<()> {
        let mut connection = self.connection.lock();
        if self.is_current(generation) {
            store(&mut connection);
            return Ok(());
        }
        drop(connection);
        let mut stale = Connection::default();
        store(&mut stale);
        self.release(stale);
        Err(StreamError::InvalidState("Publish was cancelled".into()))
    }

    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        url: &str,
        jwt: &str,
        ice_servers: Vec<IceServer>,
    ) -> Result<()> {
        let config = {
            let source = self.source.lock();
            let config = source.config();
            RtcConfiguration::default()
                .with_ice_servers(ice_servers)
                .with_bitrates(config.bitrates)
                .with_video_codec(config.video_codec)
                .with_simulcast(config.simulcast)
        };

        let (socket, socket_events) = SignalingSocket::connect(url, jwt).await?;
        let socket = Arc::new(socket);
        self.stash(generation, |c| c.socket = Some(Arc::clone(&socket)))?;

        let factory = Arc::clone(&*self.factory.read());
        let backend = factory.create_peer_connection(&config).await?;
        let peer = Arc::new(PeerConnection::new(
            backend,
            config,
            self.runtime.signaling().clone(),
        ));
        self.watch_connection_state(generation, &peer);
        self.stash(generation, |c| c.peer = Some(Arc::clone(&peer)))?;

        let (tracks, automute) = {
            let mut source = self.source.lock();
            let tracks = source.start_capture(self.runtime.audio_transport())?;
            (tracks, source.config().automute)
        };
        self.stash(generation, |c| c.capturing = true)?;
        if automute {
            // Nobody is watching yet.
            self.mute_tracks(true);
        }

        if let Some(track) = tracks.video {
            let writers = peer.add_video_track(track.id(), track.stream_id()).await?;
            let sender = self.video_sender(&peer, track.clone(), writers)?;
            let sink: Arc<dyn VideoSink> = Arc::new(sender.clone());
            track.add_sink(Arc::clone(&sink));
            self.stash(generation, |c| {
                c.video = Some(VideoPipeline {
                    track,
                    sink,
                    sender,
                })
            })?;
        }

        if let Some(track) = tracks.audio {
            let writer = peer.add_audio_track(track.id(), track.stream_id()).await?;
            let sink = OpusSink::new(
                AudioEncoderConfig::default(),
                track,
                writer,
                self.runtime.signaling(),
            )?;
            let transport = self.runtime.audio_transport();
            transport.register_callback(Some(Arc::new(sink)));
            transport.start_recording(self.runtime.audio());
            self.stash(generation, |c| c.audio_attached = true)?;
        }

        let mut exchange = SessionDescriptionExchange::new();
        let offer = peer.negotiate_local(&mut exchange).await?;
        if !self.is_current(generation) {
            return Err(StreamError::InvalidState("Publish was cancelled".into()));
        }

        let command = {
            let source = self.source.lock();
            let config = source.config();
            PublishCommand::new(
                &config.stream_name,
                &offer,
                peer.config().video_codec,
                self.event_table.names(),
                config.source_id.as_deref(),
            )
        };
        socket.send_text(command.to_json()?).map_err(|e| {
            tracing::error!("[PublishSession] {}", e);
            StreamError::Connection(WEBSOCKET_CLOSED_ERROR.into())
        })?;
        tracing::info!("[PublishSession] Publish command sent (transId {})", command.trans_id);

        let task = self.runtime.signaling().spawn(message_loop(
            Arc::downgrade(self),
            generation,
            peer,
            exchange,
            socket_events,
        ));
        let abort = task.abort_handle();
        if self.stash(generation, |c| c.message_task = Some(task)).is_err() {
            abort.abort();
            return Err(StreamError::InvalidState("Publish was cancelled".into()));
        }
        Ok(())
    }

    fn video_sender(
        &self,
        peer: &PeerConnection,
        track: VideoTrack,
        writers: Vec<Arc<dyn crate::core::streaming::SampleWriter>>,
    ) -> Result<VideoSender> {
        let rtc = peer.config();
        let layers = if rtc.simulcast_enabled() { SIMULCAST_LAYERS } else { 1 };
        let encoder_config = {
            let source = self.source.lock();
            let video = &source.config().video;
            VideoEncoderConfig::new(rtc.video_codec, video.width, video.height)
                .with_bitrates(rtc.bitrates.min_bps, rtc.bitrates.start_bps, rtc.bitrates.max_bps)
                .with_max_framerate(video.fps)
                .with_simulcast_layers(layers)
        };
        let encoder = self
            .runtime
            .encoder_factory()
            .create_encoder(&preferred_format(rtc.video_codec), layers)?;
        let transformer = self.frame_metadata.read().clone().map(FrameTransformer::new);
        VideoSender::new(
            encoder,
            &encoder_config,
            track,
            writers,
            transformer,
            self.runtime.signaling(),
        )
    }

    fn watch_connection_state(self: &Arc<Self>, generation: u64, peer: &PeerConnection) {
        let weak = Arc::downgrade(self);
        peer.on_connection_state_change(Arc::new(move |state: ConnectionState| {
            tracing::info!("[PublishSession] Peer connection state: {:?}", state);
            if state != ConnectionState::Failed {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                if inner.is_current(generation) {
                    inner.emit(PublisherEvent::PublishingError("Peer connection failed".into()));
                }
            }
        }));
    }

    async fn handle_message(
        &self,
        generation: u64,
        peer: &PeerConnection,
        pending: &mut Option<SessionDescriptionExchange>,
        text: &str,
    ) {
        let message = match SignalingMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("[PublishSession] {}", e);
                return;
            }
        };

        match message {
            SignalingMessage::Response {
                sdp: answer,
                publisher_id,
                cluster_id,
            } => {
                let Some(mut exchange) = pending.take() else {
                    tracing::warn!("[PublishSession] No peer connection awaiting an answer, ignoring response");
                    return;
                };
                let answer = sdp::add_conference_flag(&answer);
                let result = peer.apply_answer(&mut exchange, &answer).await;
                if !self.is_current(generation) {
                    return;
                }
                match result {
                    Ok(()) => {
                        {
                            let mut connection = self.connection.lock();
                            connection.publisher_id = publisher_id;
                            connection.cluster_id = cluster_id;
                        }
                        *self.state.lock() = PublishState::Publishing;
                        tracing::info!("[PublishSession] Publishing");
                        self.emit(PublisherEvent::Publishing);
                    }
                    Err(e) => {
                        tracing::error!("[PublishSession] {}", e);
                        self.emit(PublisherEvent::PublishingError(reason(&e)));
                        self.teardown();
                    }
                }
            }
            SignalingMessage::Error { message } => {
                tracing::error!("[PublishSession] Server error: {}", message);
            }
            SignalingMessage::Event { name, payload } => {
                self.event_table.dispatch(&name, &payload);
            }
            SignalingMessage::Unhandled { kind } => {
                tracing::warn!("[PublishSession] Unhandled message type '{}'", kind);
            }
        }
    }

    fn unpublish(&self) {
        let idle = *self.state.lock() == PublishState::Disconnected && self.connection.lock().is_empty();
        if idle {
            tracing::debug!("[PublishSession] Not publishing");
            return;
        }
        tracing::info!("[PublishSession] Unpublishing");
        self.teardown();
    }

    fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.release_current();
    }

    /// Tears down only if `generation` is still the live attempt.
    fn teardown_generation(&self, generation: u64) -> bool {
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.release_current();
        true
    }

    fn release_current(&self) {
        let connection = std::mem::take(&mut *self.connection.lock());
        self.release(connection);
        *self.state.lock() = PublishState::Disconnected;
    }

    fn socket_closed(&self, generation: u64, reason: Option<String>) {
        if !self.teardown_generation(generation) {
            return;
        }
        tracing::warn!("[PublishSession] WebSocket closed by the server ({:?}), disconnected", reason);
        self.emit(PublisherEvent::Disconnected);
    }

    /// Encoders and capture first, then the peer connection, then the socket.
    fn release(&self, connection: Connection) {
        if let Some(task) = connection.message_task {
            task.abort();
        }

        if let Some(video) = connection.video {
            video.track.remove_sink(&video.sink);
            video.sender.release();
        }
        if connection.audio_attached {
            let transport = self.runtime.audio_transport();
            transport.stop_recording();
            transport.register_callback(None);
        }
        if connection.capturing {
            let mut source = self.source.lock();
            if source.is_capturing() {
                source.stop_capture();
            }
        }

        if let Some(peer) = connection.peer {
            self.runtime.signaling().spawn(async move {
                if let Err(e) = peer.close().await {
                    tracing::warn!("[PublishSession] Failed to close peer connection: {}", e);
                }
            });
        }

        if let Some(socket) = connection.socket {
            socket.close();
        }
    }
}

async fn message_loop(
    session: Weak<SessionInner>,
    generation: u64,
    peer: Arc<PeerConnection>,
    exchange: SessionDescriptionExchange,
    mut socket_events: mpsc::UnboundedReceiver<SocketEvent>,
) {
    let mut pending = Some(exchange);
    while let Some(event) = socket_events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        if !inner.is_current(generation) {
            break;
        }
        match event {
            SocketEvent::Message(text) => {
                inner.handle_message(generation, &peer, &mut pending, &text).await;
            }
            SocketEvent::Closed(reason) => {
                inner.socket_closed(generation, reason);
                break;
            }
        }
    }
}

/// `active`, `inactive` and `viewercount`, forwarded as events. With
/// automute, viewers coming and going toggle the video and audio mute.
fn default_event_table(session: Weak<SessionInner>) -> EventCallbackTable {
    let mut table = EventCallbackTable::new();

    let weak = session.clone();
    table.register(
        EVENT_ACTIVE,
        Arc::new(move |_payload: &Value| {
            if let Some(inner) = weak.upgrade() {
                inner.viewers_changed(true);
            }
        }),
    );

    let weak = session.clone();
    table.register(
        EVENT_INACTIVE,
        Arc::new(move |_payload: &Value| {
            if let Some(inner) = weak.upgrade() {
                inner.viewers_changed(false);
            }
        }),
    );

    table.register(
        EVENT_VIEWER_COUNT,
        Arc::new(move |payload: &Value| {
            let Some(inner) = session.upgrade() else {
                return;
            };
            match parse_viewer_count(payload) {
                Some(count) => inner.emit(PublisherEvent::ViewerCount(count)),
                None => tracing::warn!("[PublishSession] Malformed viewercount event: {}", payload),
            }
        }),
    );

    table
}

impl SessionInner {
    /// Mutes or unmutes every captured track.
    fn mute_tracks(&self, muted: bool) {
        let source = self.source.lock();
        let Some(tracks) = source.tracks() else {
            return;
        };
        if tracks.video.is_some() {
            source.mute_video(muted);
        }
        if tracks.audio.is_some() {
            source.mute_audio(muted);
        }
    }

    fn viewers_changed(&self, active: bool) {
        let automute = self.source.lock().config().automute;
        if automute {
            self.mute_tracks(!active);
        }
        self.emit(if active {
            PublisherEvent::Active
        } else {
            PublisherEvent::Inactive
        });
    }
}

/// Error text without the category prefix.
fn reason(error: &StreamError) -> String {
    match error {
        StreamError::Connection(message)
        | StreamError::Protocol(message)
        | StreamError::Negotiation(message)
        | StreamError::Resource(message) => message.clone(),
        other => other.to_string(),
    }
}
