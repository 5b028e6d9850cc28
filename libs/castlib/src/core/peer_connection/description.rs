// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session descriptions built from raw strings.

use crate::core::{Result, StreamError};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::sdp::description::session::SessionDescription as ParsedSdp;

pub const MISSING_INPUT_ERROR: &str = "Wrong input parameter, type or sdp missing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdpType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "offer" => Ok(SdpType::Offer),
            "pranswer" => Ok(SdpType::Pranswer),
            "answer" => Ok(SdpType::Answer),
            "rollback" => Ok(SdpType::Rollback),
            _ => Err(StreamError::Protocol(MISSING_INPUT_ERROR.into())),
        }
    }
}

/// A validated SDP blob. `to_sdp` returns the exact text it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    kind: SdpType,
    sdp: String,
}

impl SessionDescription {
    /// Build from the strings carried in signaling messages.
    pub fn parse(kind: &str, sdp: &str) -> Result<Self> {
        if kind.is_empty() || sdp.is_empty() {
            return Err(StreamError::Protocol(MISSING_INPUT_ERROR.into()));
        }
        let kind = kind.parse::<SdpType>()?;
        Self::from_parts(kind, sdp.to_owned())
    }

    pub fn from_parts(kind: SdpType, sdp: String) -> Result<Self> {
        if sdp.is_empty() {
            return Err(StreamError::Protocol(MISSING_INPUT_ERROR.into()));
        }
        validate_grammar(&sdp)?;
        Ok(Self { kind, sdp })
    }

    pub fn kind(&self) -> SdpType {
        self.kind
    }

    pub fn to_sdp(&self) -> &str {
        &self.sdp
    }

    pub fn into_sdp(self) -> String {
        self.sdp
    }

    pub(crate) fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let sdp = self.sdp.clone();
        let desc = match self.kind {
            SdpType::Offer => RTCSessionDescription::offer(sdp),
            SdpType::Answer => RTCSessionDescription::answer(sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
            SdpType::Rollback => {
                return Err(StreamError::NotSupported("Rollback descriptions are not supported".into()))
            }
        };
        desc.map_err(|e| parse_error(0, &e.to_string()))
    }
}

fn parse_error(line: usize, description: &str) -> StreamError {
    StreamError::Protocol(format!(
        "Can't parse received session description message. SdpParseError line {} : {}",
        line, description
    ))
}

fn validate_grammar(sdp: &str) -> Result<()> {
    for (index, line) in sdp.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let bytes = line.as_bytes();
        if bytes.len() < 2 || !bytes[0].is_ascii_lowercase() || bytes[1] != b'=' {
            return Err(parse_error(index + 1, &format!("invalid line '{}'", line)));
        }
    }
    let mut reader = Cursor::new(sdp.as_bytes());
    ParsedSdp::unmarshal(&mut reader)
        .map(|_| ())
        .map_err(|e| parse_error(sdp.lines().count(), &e.to_string()))
}

#[cfg(test)]
pub(crate) const TEST_OFFER: &str = "v=0\r\n\
o=- 4215775240449105457 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=sendonly\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=sendonly\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=fmtp:96 max-fr=60\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_is_byte_identical() {
        let desc = SessionDescription::parse("offer", TEST_OFFER).unwrap();
        assert_eq!(desc.kind(), SdpType::Offer);
        assert_eq!(desc.to_sdp(), TEST_OFFER);
    }

    #[test]
    fn test_missing_input() {
        let err = SessionDescription::parse("", TEST_OFFER).unwrap_err();
        assert!(err.to_string().contains(MISSING_INPUT_ERROR));
        let err = SessionDescription::parse("answer", "").unwrap_err();
        assert!(err.to_string().contains(MISSING_INPUT_ERROR));
    }

    #[test]
    fn test_grammar_error_reports_line() {
        let broken = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\nthis is not sdp\r\n";
        let err = SessionDescription::parse("offer", broken).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("SdpParseError line 3"), "{}", msg);
        assert_eq!(err.category(), crate::core::ErrorCategory::Protocol);
    }

    #[test]
    fn test_converts_to_engine_description() {
        let desc = SessionDescription::parse("offer", TEST_OFFER).unwrap();
        let rtc = desc.to_rtc().unwrap();
        assert_eq!(rtc.sdp, TEST_OFFER);
    }
}
