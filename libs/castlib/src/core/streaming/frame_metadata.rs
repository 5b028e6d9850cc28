// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! User metadata trailer on encoded frames.
//!
//! Layout: `payload | 0xCAFEBABE | user data | user data length`, both
//! integers 32-bit big-endian.

use std::sync::Arc;

pub const METADATA_MAGIC: u32 = 0xCAFE_BABE;

const TRAILER_FIXED_LEN: usize = 8;

/// Fills user data for a frame given its stream index and RTP timestamp.
pub type UserDataCallback = Arc<dyn Fn(u32, u32, &mut Vec<u8>) + Send + Sync>;

#[derive(Clone)]
pub struct FrameTransformer {
    callback: UserDataCallback,
}

impl FrameTransformer {
    pub fn new(callback: UserDataCallback) -> Self {
        Self { callback }
    }

    pub fn transform(&self, stream: u32, rtp_timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let mut user_data = Vec::new();
        (self.callback)(stream, rtp_timestamp, &mut user_data);

        let mut out = Vec::with_capacity(payload.len() + user_data.len() + TRAILER_FIXED_LEN);
        out.extend_from_slice(payload);
        out.extend_from_slice(&METADATA_MAGIC.to_be_bytes());
        out.extend_from_slice(&user_data);
        out.extend_from_slice(&(user_data.len() as u32).to_be_bytes());
        out
    }
}

/// Split a transformed frame into payload and user data.
pub fn parse_frame_metadata(frame: &[u8]) -> Option<(&[u8], &[u8])> {
    if frame.len() < TRAILER_FIXED_LEN {
        return None;
    }
    let (rest, len_bytes) = frame.split_at(frame.len() - 4);
    let user_len = u32::from_be_bytes(len_bytes.try_into().ok()?) as usize;
    if rest.len() < user_len + 4 {
        return None;
    }
    let (rest, user_data) = rest.split_at(rest.len() - user_len);
    let (payload, magic) = rest.split_at(rest.len() - 4);
    if u32::from_be_bytes(magic.try_into().ok()?) != METADATA_MAGIC {
        return None;
    }
    Some((payload, user_data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_layout() {
        let transformer = FrameTransformer::new(Arc::new(|stream: u32, ts: u32, data: &mut Vec<u8>| {
            data.push(stream as u8);
            data.extend_from_slice(&ts.to_be_bytes());
        }));
        let out = transformer.transform(2, 0x0102_0304, &[9, 9]);
        assert_eq!(
            out,
            vec![9, 9, 0xCA, 0xFE, 0xBA, 0xBE, 2, 1, 2, 3, 4, 0, 0, 0, 5]
        );

        let (payload, user) = parse_frame_metadata(&out).unwrap();
        assert_eq!(payload, &[9, 9]);
        assert_eq!(user, &[2, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_user_data_still_marked() {
        let transformer = FrameTransformer::new(Arc::new(|_: u32, _: u32, _: &mut Vec<u8>| {}));
        let out = transformer.transform(0, 0, &[1]);
        assert_eq!(out.len(), 9);
        assert_eq!(parse_frame_metadata(&out), Some((&[1u8][..], &[][..])));
    }

    #[test]
    fn test_parse_rejects_plain_frames() {
        assert!(parse_frame_metadata(&[0, 0, 0, 1, 0x65, 0, 0, 0, 0]).is_none());
        assert!(parse_frame_metadata(&[0, 0, 0, 200]).is_none());
    }
}
