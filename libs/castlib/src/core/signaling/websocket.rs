// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Signaling WebSocket
//
// One connection per publish attempt. Inbound text frames and the final
// close are forwarded on a channel; outbound frames go through a writer
// task. There is no reconnect: a closed socket stays closed.

use crate::core::{Result, StreamError};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::Message;

/// Prefix of the error reported when the handshake fails.
pub const CONNECT_ERROR: &str = "Could not connect websocket";

/// URL the WebSocket connects to: `url?token=jwt`.
pub fn connect_url(url: &str, jwt: &str) -> String {
    format!("{}?token={}", url, jwt)
}

pub fn user_agent() -> String {
    format!(
        "MillicastPublisher/{}/{}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(String),
    Closed(Option<String>),
}

pub struct SignalingSocket {
    url: String,
    outbound: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingSocket {
    /// Connects to `url?token=jwt`. Must run inside a tokio runtime; the
    /// reader and writer tasks are spawned on it.
    pub async fn connect(
        url: &str,
        jwt: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SocketEvent>)> {
        super::director::install_crypto_provider();

        let target = connect_url(url, jwt);
        let mut request = target
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::Connection(format!("Invalid WebSocket url '{}': {}", url, e)))?;
        let agent = HeaderValue::from_str(&user_agent())
            .map_err(|e| StreamError::Configuration(format!("Invalid user agent: {}", e)))?;
        request.headers_mut().insert(USER_AGENT, agent);

        tracing::info!("[Signaling] Connecting WebSocket to {}", url);
        let (stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(|e| {
            tracing::error!("[Signaling] WebSocket connection error: {}", e);
            StreamError::Connection(format!("{}: {}", CONNECT_ERROR, e))
        })?;
        tracing::info!("[Signaling] WebSocket connected");

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    tracing::warn!("[Signaling] WebSocket send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader_open = Arc::clone(&open);
        let reader = tokio::spawn(async move {
            let mut reason = None;
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        tracing::debug!("[Signaling] WebSocket message: {}", text);
                        if events_tx.send(SocketEvent::Message(text.to_string())).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::Release);
            tracing::info!("[Signaling] WebSocket closed ({:?})", reason);
            let _ = events_tx.send(SocketEvent::Closed(reason));
        });

        Ok((
            Self {
                url: url.to_owned(),
                outbound: outbound_tx,
                open,
                tasks: Mutex::new(vec![writer, reader]),
            },
            events_rx,
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(StreamError::Connection("WebSocket is closed".into()));
        }
        self.outbound
            .send(Message::text(text))
            .map_err(|_| StreamError::Connection("WebSocket writer stopped".into()))
    }

    /// Sends a close frame and stops the tasks. Safe to call repeatedly.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::debug!("[Signaling] Closing WebSocket");
            let _ = self.outbound.send(Message::Close(None));
        }
        // The writer exits after sending the close frame.
        for task in self.tasks.lock().drain(..).skip(1) {
            task.abort();
        }
    }
}

impl Drop for SignalingSocket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_url() {
        assert_eq!(connect_url("wss://x", "abc"), "wss://x?token=abc");
    }

    #[test]
    fn test_user_agent_names_os_and_version() {
        let agent = user_agent();
        assert!(agent.starts_with("MillicastPublisher/"));
        assert!(agent.ends_with(env!("CARGO_PKG_VERSION")));
        assert!(agent.contains(std::env::consts::OS));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = SignalingSocket::connect(&format!("ws://127.0.0.1:{}", port), "jwt")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::Connection(ref m) if m.starts_with(CONNECT_ERROR)));
    }
}
