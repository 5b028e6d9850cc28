// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Peer connection lifecycle: configuration, session descriptions,
//! negotiation observers and the engine seam.

mod backend;
mod configuration;
mod description;
mod observer;
pub mod sdp;
mod wrapper;

pub use backend::{
    ConnectionState, ConnectionStateCallback, PeerConnectionBackend, PeerConnectionFactory,
    WebRtcBackend,
};
pub use configuration::{
    video_encodings, RtcConfiguration, RtpEncoding, SdpSemantics, SIMULCAST_RIDS,
};
pub use description::{SdpType, SessionDescription, MISSING_INPUT_ERROR};
pub use observer::{
    CreateSessionDescriptionObserver, Observer, ObserverResult, SessionDescriptionExchange,
    SetSessionDescriptionObserver,
};
pub use wrapper::{
    NegotiationState, PeerConnection, CREATE_OFFER_ERROR, SET_LOCAL_ERROR, SET_REMOTE_ERROR,
};

#[cfg(test)]
pub(crate) use backend::testing;
#[cfg(test)]
pub(crate) use description::TEST_OFFER;
