// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Local tracks and the encode-to-RTP send path.

mod frame_metadata;
mod opus;
mod track;
mod video_sender;

pub use frame_metadata::{parse_frame_metadata, FrameTransformer, UserDataCallback, METADATA_MAGIC};
pub use opus::{AudioEncoderConfig, OpusEncoder, OpusSink};
pub use track::{AudioTrack, MediaTrack, SampleWriter, VideoSink, VideoTrack};
pub use video_sender::VideoSender;
