// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod peer_connection;
pub mod publisher;
pub mod runtime;
pub mod signaling;
pub mod stats;
pub mod streaming;
pub mod video;

pub use audio::{AudioFrame, AudioFrameBuffer, AudioSink, AudioSource, AudioTransport};
pub use codec::{SdpVideoFormat, VideoCodecKind};
pub use config::{AudioCaptureConfig, BitrateSettings, PublisherConfig, VideoCaptureConfig};
pub use error::*;
pub use peer_connection::{
    PeerConnection, PeerConnectionBackend, PeerConnectionFactory, RtcConfiguration, SdpType,
    SessionDescription,
};
pub use publisher::{CapturedTracks, PublishSession, PublishState, PublisherEvent, PublisherSource};
pub use runtime::{RuntimeConfig, WebRtcRuntime};
pub use signaling::{
    DirectorClient, DirectorResponse, EventCallbackTable, IceServer, PublishCredentials,
};
pub use stats::{PublisherStats, StatsSnapshot};
pub use video::{EncoderContext, SimulcastFrameBuffer, VideoSource};
