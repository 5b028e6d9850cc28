// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! JSON framing for the publish WebSocket.

use crate::core::codec::VideoCodecKind;
use crate::core::{Result, StreamError};
use serde::Serialize;
use serde_json::Value;

/// A decoded inbound WebSocket message.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    /// Answer to the publish command.
    Response {
        sdp: String,
        publisher_id: Option<String>,
        cluster_id: Option<String>,
    },
    /// Server-side error about the request we sent.
    Error { message: String },
    /// Server push such as `active` or `viewercount`. `payload` is the whole message.
    Event { name: String, payload: Value },
    /// Any other `type`.
    Unhandled { kind: String },
}

impl SignalingMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let json: Value = serde_json::from_str(text)
            .map_err(|e| StreamError::Protocol(format!("Could not deserialize JSON: {}", e)))?;
        let kind = json
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| StreamError::Protocol("Message has no 'type' field".into()))?;

        match kind {
            "response" => {
                let data = json.get("data");
                let string_field = |name: &str| {
                    data.and_then(|d| d.get(name))
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                };
                let sdp = string_field("sdp")
                    .ok_or_else(|| StreamError::Protocol("Response has no 'data.sdp'".into()))?;
                Ok(SignalingMessage::Response {
                    sdp,
                    publisher_id: string_field("publisherId"),
                    cluster_id: string_field("clusterId"),
                })
            }
            "error" => {
                let message = match json.get("data") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Ok(SignalingMessage::Error { message })
            }
            "event" => {
                let name = json
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                Ok(SignalingMessage::Event {
                    name,
                    payload: json,
                })
            }
            other => Ok(SignalingMessage::Unhandled {
                kind: other.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishData {
    pub name: String,
    pub sdp: String,
    pub codec: String,
    pub events: Vec<String>,
    #[serde(rename = "sourceId", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// Outbound `cmd` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishCommand {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "transId")]
    pub trans_id: u32,
    pub name: &'static str,
    pub data: PublishData,
}

impl PublishCommand {
    pub fn new(
        stream_name: &str,
        sdp: &str,
        codec: VideoCodecKind,
        events: Vec<String>,
        source_id: Option<&str>,
    ) -> Self {
        Self {
            kind: "cmd",
            trans_id: fastrand::u32(..),
            name: "publish",
            data: PublishData {
                name: stream_name.to_owned(),
                sdp: sdp.to_owned(),
                codec: codec.as_str().to_owned(),
                events,
                source_id: source_id.filter(|s| !s.is_empty()).map(str::to_owned),
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let msg = SignalingMessage::parse(
            r#"{"type":"response","transId":1,"data":{"sdp":"v=0\r\n","publisherId":"p1","clusterId":"c1"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Response {
                sdp: "v=0\r\n".into(),
                publisher_id: Some("p1".into()),
                cluster_id: Some("c1".into()),
            }
        );
    }

    #[test]
    fn test_parse_error_event_and_unknown() {
        assert_eq!(
            SignalingMessage::parse(r#"{"type":"error","data":"stream not allowed"}"#).unwrap(),
            SignalingMessage::Error {
                message: "stream not allowed".into()
            }
        );
        match SignalingMessage::parse(r#"{"type":"event","name":"active","data":{}}"#).unwrap() {
            SignalingMessage::Event { name, payload } => {
                assert_eq!(name, "active");
                assert_eq!(payload["type"], "event");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            SignalingMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            SignalingMessage::Unhandled { kind: "ping".into() }
        );
    }

    #[test]
    fn test_malformed_messages() {
        assert!(SignalingMessage::parse("{").is_err());
        assert!(SignalingMessage::parse(r#"{"data":1}"#).is_err());
        assert!(SignalingMessage::parse(r#"{"type":"response","data":{}}"#).is_err());
    }

    #[test]
    fn test_publish_command_shape() {
        let cmd = PublishCommand::new(
            "stream",
            "v=0",
            VideoCodecKind::H264,
            vec!["active".into(), "inactive".into()],
            None,
        );
        let json: Value = serde_json::from_str(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "cmd");
        assert_eq!(json["name"], "publish");
        assert!(json["transId"].is_u64());
        assert_eq!(json["data"]["codec"], "h264");
        assert_eq!(json["data"]["events"], serde_json::json!(["active", "inactive"]));
        assert!(json["data"].get("sourceId").is_none());

        let cmd = PublishCommand::new("s", "v=0", VideoCodecKind::Vp8, vec![], Some("cam2"));
        let json: Value = serde_json::from_str(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(json["data"]["sourceId"], "cam2");
    }
}
