// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Director client
//
// Authenticates a publish request over HTTPS and returns the WebSocket URL,
// JWT and ICE servers for the signaling session.

use crate::core::{Result, StreamError};
use http_body_util::combinators::BoxBody;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DIRECTOR_TIMEOUT: Duration = Duration::from_secs(10);

/// What the director needs to authorize a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishCredentials {
    pub stream_name: String,
    pub token: String,
    pub url: String,
}

impl PublishCredentials {
    pub fn new(stream_name: impl Into<String>, token: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            token: token.into(),
            url: url.into(),
        }
    }
}

/// ICE server as handed out by the director. Username and credential are
/// absent for plain STUN entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorResponse {
    pub jwt: String,
    pub ws_url: String,
    pub ice_servers: Vec<IceServer>,
}

type HttpClient = Client<
    hyper_rustls::HttpsConnector<HttpConnector>,
    BoxBody<bytes::Bytes, Box<dyn std::error::Error + Send + Sync>>,
>;

pub struct DirectorClient {
    http_client: HttpClient,
    timeout: Duration,
}

impl DirectorClient {
    pub fn new() -> Result<Self> {
        install_crypto_provider();

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| StreamError::Configuration(format!("Failed to load CA roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let http_client = Client::builder(hyper_util::rt::TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(https);

        Ok(Self {
            http_client,
            timeout: DIRECTOR_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// POSTs `{streamName}` with the bearer token. Any non-200 answer or
    /// transport failure comes back as `Authentication { status, body }`,
    /// with status 0 when no response was received.
    pub async fn publish(&self, credentials: &PublishCredentials) -> Result<DirectorResponse> {
        use http_body_util::{BodyExt, Full};
        use hyper::{Request, StatusCode, header};

        let payload = serde_json::json!({ "streamName": credentials.stream_name }).to_string();
        let body = Full::new(bytes::Bytes::from(payload))
            .map_err(|never| match never {})
            .boxed();

        let req = Request::builder()
            .method("POST")
            .uri(&credentials.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", credentials.token))
            .body(body)
            .map_err(|e| StreamError::Configuration(format!("Failed to build director request: {}", e)))?;

        tracing::info!("[Director] POST {} for stream '{}'", credentials.url, credentials.stream_name);

        let response = match tokio::time::timeout(self.timeout, self.http_client.request(req)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(transport_failure(format!("Director request failed: {}", e))),
            Err(_) => {
                return Err(transport_failure(format!(
                    "Director request timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let status = response.status();
        let body_bytes = BodyExt::collect(response.into_body())
            .await
            .map_err(|e| transport_failure(format!("Failed to read director response: {}", e)))?
            .to_bytes();
        let body_text = String::from_utf8_lossy(&body_bytes).into_owned();

        if status != StatusCode::OK {
            tracing::error!("[Director] Request failed [code] {} [body] {}", status.as_u16(), body_text);
            return Err(StreamError::Authentication {
                status: status.as_u16(),
                body: body_text,
            });
        }

        tracing::debug!("[Director] Response: {}", body_text);
        parse_director_response(&body_text)
    }
}

/// Installs the ring provider for rustls unless one is already set.
pub(crate) fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Losing the race to another installer is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

fn transport_failure(message: String) -> StreamError {
    tracing::error!("[Director] {}", message);
    StreamError::Authentication {
        status: 0,
        body: message,
    }
}

/// Extracts jwt, the first WebSocket URL and the ICE servers. ICE entries
/// are read leniently: missing username/credential are skipped, and an
/// entry whose urls cannot be read is dropped with a warning.
pub fn parse_director_response(body: &str) -> Result<DirectorResponse> {
    let json: Value = serde_json::from_str(body)?;
    let data = json
        .get("data")
        .ok_or_else(|| StreamError::Protocol("Director response has no 'data' field".into()))?;

    let jwt = data
        .get("jwt")
        .and_then(Value::as_str)
        .ok_or_else(|| StreamError::Protocol("Director response has no 'jwt'".into()))?
        .to_owned();
    let ws_url = data
        .get("urls")
        .and_then(Value::as_array)
        .and_then(|urls| urls.first())
        .and_then(Value::as_str)
        .ok_or_else(|| StreamError::Protocol("Director response has no WebSocket url".into()))?
        .to_owned();

    let ice_servers = data
        .get("iceServers")
        .and_then(Value::as_array)
        .map(|servers| servers.iter().filter_map(parse_ice_server).collect())
        .unwrap_or_default();

    Ok(DirectorResponse {
        jwt,
        ws_url,
        ice_servers,
    })
}

fn parse_ice_server(entry: &Value) -> Option<IceServer> {
    let Some(object) = entry.as_object() else {
        tracing::warn!("[Director] Could not read ice server json");
        return None;
    };

    let urls = match object.get("urls").or_else(|| object.get("url")) {
        Some(Value::String(url)) => vec![url.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
        _ => Vec::new(),
    };
    if urls.is_empty() {
        tracing::warn!("[Director] Skipping ice server without urls: {}", entry);
        return None;
    }

    let field = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_owned);
    Some(IceServer {
        urls,
        username: field("username"),
        credential: field("credential"),
    })
}
