// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Textual SDP rewrites applied around negotiation.

use crate::core::config::BitrateSettings;

const OPUS_FMTP: &str = "minptime=10;useinbandfec=1";
const CONFERENCE_FLAG: &str = "a=x-google-flag:conference\r\n";

/// Request stereo Opus by extending the first matching fmtp parameter list.
pub fn enable_opus_stereo(sdp: &str) -> String {
    sdp.replacen(OPUS_FMTP, &format!("{}; stereo=1", OPUS_FMTP), 1)
}

/// Mark the remote answer as a conference description.
pub fn add_conference_flag(sdp: &str) -> String {
    let mut out = String::with_capacity(sdp.len() + CONFERENCE_FLAG.len() + 2);
    out.push_str(sdp);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str("\r\n");
    }
    out.push_str(CONFERENCE_FLAG);
    out
}

/// Add bandwidth lines and x-google bitrate hints to every video section.
///
/// `b=` lines go after the section's `c=` line to keep SDP field order.
/// Line endings of the input are kept.
pub fn apply_video_bitrates(sdp: &str, bitrates: &BitrateSettings) -> String {
    let mut out = String::with_capacity(sdp.len() + 256);
    let mut in_video = false;
    let mut bandwidth_pending = false;
    let bandwidth = |ending: &str| {
        format!(
            "b=AS:{}{}b=TIAS:{}{}",
            bitrates.max_bps / 1000,
            ending,
            bitrates.max_bps,
            ending
        )
    };

    for raw in sdp.split_inclusive('\n') {
        let line = raw.trim_end_matches(['\r', '\n']);
        let ending = match &raw[line.len()..] {
            "" => "\r\n",
            other => other,
        };

        if bandwidth_pending && !line.starts_with("c=") && !line.starts_with("i=") {
            out.push_str(&bandwidth(ending));
            bandwidth_pending = false;
        }
        if line.starts_with("m=") {
            in_video = line.starts_with("m=video");
            bandwidth_pending = in_video;
        }

        if in_video && (line.starts_with("b=AS:") || line.starts_with("b=TIAS:")) {
            continue;
        }

        out.push_str(line);
        if in_video && line.starts_with("a=fmtp:") && !line.contains("x-google-max-bitrate") {
            out.push_str(&format!(
                ";x-google-min-bitrate={};x-google-start-bitrate={};x-google-max-bitrate={}",
                bitrates.min_bps / 1000,
                bitrates.start_bps / 1000,
                bitrates.max_bps / 1000
            ));
        }
        out.push_str(ending);
    }
    if bandwidth_pending {
        out.push_str(&bandwidth("\r\n"));
    }
    out
}
