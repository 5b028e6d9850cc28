// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::too_many_arguments)] // Encoded-image construction carries many timing fields
#![allow(clippy::type_complexity)] // Callback slot types are clear in context

pub mod core;

pub use core::{
    AudioFrame, AudioFrameBuffer, AudioSink, AudioSource, AudioTransport, BitrateSettings,
    CapturedTracks, DirectorClient, DirectorResponse, EncoderContext, ErrorCategory,
    EventCallbackTable, IceServer, PeerConnection, PeerConnectionBackend, PeerConnectionFactory,
    PublishCredentials, PublishSession, PublishState, PublisherConfig, PublisherEvent,
    PublisherSource, Result, RuntimeConfig, SdpType, SessionDescription, SimulcastFrameBuffer,
    StreamError, VideoCodecKind, VideoSource, WebRtcRuntime,
};
