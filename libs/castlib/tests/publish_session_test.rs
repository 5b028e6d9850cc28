// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end publish flow against a local director and signaling server.
//!
//! The director is a hand-rolled HTTP/1.1 responder and the signaling server
//! a tokio-tungstenite acceptor, both on loopback. The WebRTC engine is
//! replaced by a scripted backend so no network media flows.

use castlib::core::peer_connection::{
    ConnectionStateCallback, PeerConnectionBackend, PeerConnectionFactory, RtcConfiguration,
    RtpEncoding, SessionDescription,
};
use castlib::core::streaming::SampleWriter;
use castlib::{
    PublishSession, PublishState, PublisherConfig, PublisherEvent, PublisherSource, Result,
    RuntimeConfig, VideoCodecKind, WebRtcRuntime,
};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use webrtc::media::Sample;

const OFFER: &str = "v=0\r\n\
o=- 4215775240449105457 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=sendonly\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n";

const ANSWER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=recvonly\r\n\
a=rtpmap:111 opus/48000/2\r\n";

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Scripted engine
// ============================================================================

#[derive(Default)]
struct NullWriter;

impl SampleWriter for NullWriter {
    fn write_sample<'a>(&'a self, _sample: &'a Sample) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Default)]
struct LoopbackBackend {
    local: Mutex<Option<String>>,
    remote: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl PeerConnectionBackend for LoopbackBackend {
    fn add_video_track<'a>(
        &'a self,
        _codec: VideoCodecKind,
        encodings: &'a [RtpEncoding],
        _track_id: &'a str,
        _stream_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Arc<dyn SampleWriter>>>> {
        Box::pin(async move {
            Ok(encodings
                .iter()
                .map(|_| Arc::new(NullWriter) as Arc<dyn SampleWriter>)
                .collect())
        })
    }

    fn add_audio_track<'a>(
        &'a self,
        _track_id: &'a str,
        _stream_id: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn SampleWriter>>> {
        Box::pin(async { Ok(Arc::new(NullWriter) as Arc<dyn SampleWriter>) })
    }

    fn create_offer(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async { Ok(OFFER.to_owned()) })
    }

    fn set_local_description(&self, desc: SessionDescription) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.local.lock() = Some(desc.into_sdp());
            Ok(())
        })
    }

    fn local_description(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move { self.local.lock().clone() })
    }

    fn set_remote_description(&self, desc: SessionDescription) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.remote.lock() = Some(desc.into_sdp());
            Ok(())
        })
    }

    fn on_connection_state_change(&self, _callback: ConnectionStateCallback) {}

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
struct LoopbackFactory {
    backend: Arc<LoopbackBackend>,
    configs: Mutex<Vec<RtcConfiguration>>,
}

impl PeerConnectionFactory for LoopbackFactory {
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

// ============================================================================
// Loopback servers
// ============================================================================

/// What the signaling server saw from the client.
struct SignalingLog {
    uri: String,
    user_agent: Option<String>,
    command: Value,
}

/// Accepts one WebSocket, answers the publish command, then sends `pushes`.
async fn spawn_signaling_server(pushes: Vec<Value>) -> (String, oneshot::Receiver<SignalingLog>) {
    spawn_signaling_server_with(pushes, false).await
}

/// Like `spawn_signaling_server`; with `hang_up` the server closes the
/// socket right after the pushes.
async fn spawn_signaling_server_with(
    pushes: Vec<Value>,
    hang_up: bool,
) -> (String, oneshot::Receiver<SignalingLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let mut user_agent = None;
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            uri = req.uri().to_string();
            user_agent = req
                .headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            Ok(resp)
        })
        .await
        .unwrap();

        let command: Value = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Signaling client went away: {:?}", other),
            }
        };

        let response = json!({
            "type": "response",
            "transId": command["transId"],
            "data": {"sdp": ANSWER, "publisherId": "pub-1", "clusterId": "cluster-1"}
        });
        ws.send(Message::text(response.to_string())).await.unwrap();
        for push in pushes {
            ws.send(Message::text(push.to_string())).await.unwrap();
        }
        let _ = tx.send(SignalingLog {
            uri,
            user_agent,
            command,
        });

        if hang_up {
            let _ = ws.send(Message::Close(None)).await;
        }
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    (url, rx)
}

/// Answers one HTTP request with `status` and `body`; hands back the raw request.
async fn spawn_director(status: &'static str, body: String) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/api/director/publish", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            if request_complete(&request) {
                break;
            }
        }

        let reply = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(reply.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
        let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
    });

    (url, rx)
}

fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    request.len() >= header_end + 4 + content_length
}

// ============================================================================
// Helpers
// ============================================================================

fn audio_session(
    runtime: &WebRtcRuntime,
    config: PublisherConfig,
) -> (PublishSession, Arc<LoopbackFactory>) {
    let factory = Arc::new(LoopbackFactory::default());
    let source = PublisherSource::new(config.with_capture(false, true));
    let session = PublishSession::new(runtime, source)
        .with_peer_connection_factory(Arc::clone(&factory) as Arc<dyn PeerConnectionFactory>);
    (session, factory)
}

async fn next_event(events: &mut broadcast::Receiver<PublisherEvent>) -> PublisherEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a publisher event")
        .expect("event channel closed")
}

async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_publish_with_ws_and_jwt_reaches_publishing() {
    let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
    let (session, factory) = audio_session(
        &runtime,
        PublisherConfig::new("my-stream", "token").with_source_id("cam-1"),
    );
    let mut events = session.subscribe();

    let (url, log) = spawn_signaling_server(vec![
        json!({"type": "event", "name": "active", "data": {}}),
        json!({"type": "event", "name": "viewercount", "data": {"viewercount": 7}}),
        json!({"type": "event", "name": "stopped", "data": {}}),
    ])
    .await;

    session.publish_with_ws_and_jwt(&url, "abc").await.unwrap();

    assert_eq!(next_event(&mut events).await, PublisherEvent::Publishing);
    assert_eq!(next_event(&mut events).await, PublisherEvent::Active);
    assert_eq!(next_event(&mut events).await, PublisherEvent::ViewerCount(7));
    assert!(session.is_publishing());
    assert_eq!(session.publisher_id().as_deref(), Some("pub-1"));
    assert_eq!(session.cluster_id().as_deref(), Some("cluster-1"));

    let log = tokio::time::timeout(WAIT, log).await.unwrap().unwrap();
    assert!(log.uri.ends_with("?token=abc"), "uri was {}", log.uri);
    assert!(log.user_agent.unwrap().starts_with("MillicastPublisher/"));

    let command = log.command;
    assert_eq!(command["type"], "cmd");
    assert_eq!(command["name"], "publish");
    assert!(command["transId"].is_u64());
    assert_eq!(command["data"]["name"], "my-stream");
    assert_eq!(command["data"]["codec"], "vp8");
    assert_eq!(command["data"]["sourceId"], "cam-1");
    assert_eq!(
        command["data"]["events"],
        json!(["active", "inactive", "viewercount"])
    );
    let offer = command["data"]["sdp"].as_str().unwrap();
    assert!(offer.contains("minptime=10;useinbandfec=1; stereo=1"));

    let remote = factory.backend.remote.lock().clone().unwrap();
    assert!(remote.starts_with(ANSWER));
    assert!(remote.ends_with("a=x-google-flag:conference\r\n"));

    session.unpublish();
    session.unpublish();
    assert_eq!(session.state(), PublishState::Disconnected);
    let backend = Arc::clone(&factory.backend);
    wait_until(move || backend.closed.load(Ordering::SeqCst)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    drop(session);
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_publish_through_director() {
    let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
    let (ws_url, log) = spawn_signaling_server(Vec::new()).await;
    let body = json!({
        "data": {
            "jwt": "abc",
            "urls": [ws_url],
            "iceServers": [
                {"urls": ["turn:turn.example.com:3478"], "username": "u", "credential": "c"},
                {"username": "missing-urls"}
            ]
        }
    })
    .to_string();
    let (director_url, request) = spawn_director("200 OK", body).await;

    let (session, factory) = audio_session(
        &runtime,
        PublisherConfig::new("my-stream", "secret-token").with_stream_url(director_url),
    );
    let mut events = session.subscribe();

    session.publish().await.unwrap();
    assert_eq!(next_event(&mut events).await, PublisherEvent::Publishing);

    let request = tokio::time::timeout(WAIT, request).await.unwrap().unwrap();
    let lowered = request.to_ascii_lowercase();
    assert!(request.starts_with("POST /api/director/publish"));
    assert!(lowered.contains("authorization: bearer secret-token"));
    assert!(lowered.contains("content-type: application/json"));
    assert!(request.contains(r#"{"streamName":"my-stream"}"#));

    let log = tokio::time::timeout(WAIT, log).await.unwrap().unwrap();
    assert!(log.uri.ends_with("?token=abc"));

    let configs = factory.configs.lock().clone();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].ice_servers.len(), 1);
    assert_eq!(configs[0].ice_servers[0].username.as_deref(), Some("u"));

    // A second publish while active is ignored.
    session.publish().await.unwrap();
    assert_eq!(factory.configs.lock().len(), 1);

    drop(session);
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_director_rejection_reports_authentication_failure() {
    let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
    let (director_url, _request) =
        spawn_director("401 Unauthorized", r#"{"status":"fail"}"#.to_owned()).await;
    let (session, factory) = audio_session(
        &runtime,
        PublisherConfig::new("my-stream", "bad-token").with_stream_url(director_url),
    );
    let mut events = session.subscribe();

    let err = session.publish().await.unwrap_err();
    assert!(matches!(
        err,
        castlib::StreamError::Authentication { status: 401, .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        PublisherEvent::AuthenticationFailure {
            status: 401,
            body: r#"{"status":"fail"}"#.to_owned(),
        }
    );
    assert_eq!(session.state(), PublishState::Disconnected);
    assert!(factory.configs.lock().is_empty());

    drop(session);
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_director_is_status_zero() {
    let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (session, _factory) = audio_session(
        &runtime,
        PublisherConfig::new("my-stream", "token")
            .with_stream_url(format!("http://127.0.0.1:{}/api/director/publish", port)),
    );
    let mut events = session.subscribe();

    assert!(session.publish().await.is_err());
    assert!(matches!(
        next_event(&mut events).await,
        PublisherEvent::AuthenticationFailure { status: 0, .. }
    ));

    drop(session);
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_close_allows_publishing_again() {
    let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
    let (session, factory) = audio_session(&runtime, PublisherConfig::new("my-stream", "token"));
    let mut events = session.subscribe();

    let (url, _log) = spawn_signaling_server_with(Vec::new(), true).await;
    session.publish_with_ws_and_jwt(&url, "abc").await.unwrap();
    assert_eq!(next_event(&mut events).await, PublisherEvent::Publishing);
    assert_eq!(next_event(&mut events).await, PublisherEvent::Disconnected);
    assert_eq!(session.state(), PublishState::Disconnected);
    assert!(!session.with_source(|source| source.is_capturing()));
    let backend = Arc::clone(&factory.backend);
    wait_until(move || backend.closed.load(Ordering::SeqCst)).await;

    let (url, _log) = spawn_signaling_server(Vec::new()).await;
    session.publish_with_ws_and_jwt(&url, "abc").await.unwrap();
    assert_eq!(next_event(&mut events).await, PublisherEvent::Publishing);
    assert!(session.is_publishing());
    assert_eq!(factory.configs.lock().len(), 2);

    drop(session);
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_publish_again_after_unpublish() {
    let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
    let (session, factory) = audio_session(&runtime, PublisherConfig::new("my-stream", "token"));
    let mut events = session.subscribe();

    let (url, _log) = spawn_signaling_server(Vec::new()).await;
    session.publish_with_ws_and_jwt(&url, "abc").await.unwrap();
    assert_eq!(next_event(&mut events).await, PublisherEvent::Publishing);
    session.unpublish();
    assert_eq!(session.state(), PublishState::Disconnected);

    let (url, log) = spawn_signaling_server(Vec::new()).await;
    session.publish_with_ws_and_jwt(&url, "def").await.unwrap();
    assert_eq!(next_event(&mut events).await, PublisherEvent::Publishing);
    let log = tokio::time::timeout(WAIT, log).await.unwrap().unwrap();
    assert!(log.uri.ends_with("?token=def"));
    assert_eq!(factory.configs.lock().len(), 2);

    drop(session);
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_websocket_connect_failure_resets_session() {
    let runtime = WebRtcRuntime::init(RuntimeConfig::default()).unwrap();
    let (session, factory) = audio_session(&runtime, PublisherConfig::new("my-stream", "token"));
    let mut events = session.subscribe();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = session
        .publish_with_ws_and_jwt(&format!("ws://127.0.0.1:{}/ws", port), "abc")
        .await
        .unwrap_err();
    assert!(matches!(err, castlib::StreamError::Connection(_)));
    match next_event(&mut events).await {
        PublisherEvent::PublishingError(reason) => {
            assert!(reason.starts_with("Could not connect websocket"), "{}", reason)
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(session.state(), PublishState::Disconnected);
    assert!(factory.configs.lock().is_empty());
    assert!(!session.with_source(|source| source.is_capturing()));

    let (url, _log) = spawn_signaling_server(Vec::new()).await;
    session.publish_with_ws_and_jwt(&url, "abc").await.unwrap();
    assert_eq!(next_event(&mut events).await, PublisherEvent::Publishing);

    drop(session);
    runtime.shutdown();
}
