// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Peer connection wrapper
//
// Drives one offer/answer cycle over a `PeerConnectionBackend`. Every step
// runs on the signaling runtime and reports through a single-use observer.
// Steps are strictly ordered by `NegotiationState`; a failed step parks the
// machine in `Failed` and nothing is retried.

use super::backend::{ConnectionStateCallback, PeerConnectionBackend};
use super::configuration::RtcConfiguration;
use super::description::{SdpType, SessionDescription};
use super::observer::{
    CreateSessionDescriptionObserver, SessionDescriptionExchange, SetSessionDescriptionObserver,
};
use super::sdp;
use crate::core::streaming::SampleWriter;
use crate::core::{Result, StreamError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;

pub const CREATE_OFFER_ERROR: &str = "Could not create offer";
pub const SET_LOCAL_ERROR: &str = "Could not set local description";
pub const SET_REMOTE_ERROR: &str = "Could not set remote description";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferCreating,
    LocalDescriptionSetting,
    AwaitingRemoteAnswer,
    RemoteDescriptionSetting,
    Published,
    Failed(String),
    Closed,
}

pub struct PeerConnection {
    backend: Arc<dyn PeerConnectionBackend>,
    config: RtcConfiguration,
    signaling: Handle,
    state: Arc<Mutex<NegotiationState>>,
}

impl PeerConnection {
    pub fn new(backend: Arc<dyn PeerConnectionBackend>, config: RtcConfiguration, signaling: Handle) -> Self {
        Self {
            backend,
            config,
            signaling,
            state: Arc::new(Mutex::new(NegotiationState::Idle)),
        }
    }

    pub fn config(&self) -> &RtcConfiguration {
        &self.config
    }

    pub fn state(&self) -> NegotiationState {
        self.state.lock().clone()
    }

    pub fn on_connection_state_change(&self, callback: ConnectionStateCallback) {
        self.backend.on_connection_state_change(callback);
    }

    /// Adds the video transceiver with the encodings implied by the configuration.
    pub async fn add_video_track(
        &self,
        track_id: &str,
        stream_id: &str,
    ) -> Result<Vec<Arc<dyn SampleWriter>>> {
        let encodings = self.config.video_encodings();
        self.backend
            .add_video_track(self.config.video_codec, &encodings, track_id, stream_id)
            .await
    }

    pub async fn add_audio_track(&self, track_id: &str, stream_id: &str) -> Result<Arc<dyn SampleWriter>> {
        self.backend.add_audio_track(track_id, stream_id).await
    }

    /// Moves `from` to `to` if the machine is currently in `from`.
    fn advance(&self, from: &NegotiationState, to: NegotiationState) -> bool {
        let mut state = self.state.lock();
        if *state != *from {
            return false;
        }
        *state = to;
        true
    }

    /// Creates a send-only offer on the signaling runtime. Bitrate bounds are
    /// written into the SDP before it reaches the observer.
    pub fn create_offer(&self, observer: CreateSessionDescriptionObserver) {
        if !self.advance(&NegotiationState::Idle, NegotiationState::OfferCreating) {
            tracing::warn!(
                "[PeerConnection] create_offer ignored in state {:?}",
                self.state()
            );
            observer.on_failure(format!("{}: negotiation already started", CREATE_OFFER_ERROR));
            return;
        }

        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let bitrates = self.config.bitrates;
        self.signaling.spawn(async move {
            let offer = backend.create_offer().await.and_then(|raw| {
                let munged = sdp::apply_video_bitrates(&raw, &bitrates);
                SessionDescription::from_parts(SdpType::Offer, munged)
            });
            match offer {
                Ok(desc) => {
                    tracing::debug!("[PeerConnection] Offer created");
                    observer.on_success(desc);
                }
                Err(e) => {
                    tracing::error!("[PeerConnection] {}: {}", CREATE_OFFER_ERROR, e);
                    *state.lock() = NegotiationState::Failed(CREATE_OFFER_ERROR.into());
                    observer.on_failure(CREATE_OFFER_ERROR);
                }
            }
        });
    }

    /// Applies a local description built from raw strings. A malformed
    /// description fails the observer and leaves the state untouched.
    pub fn set_local_description(&self, kind: &str, sdp: &str, observer: SetSessionDescriptionObserver) {
        let desc = match SessionDescription::parse(kind, sdp) {
            Ok(desc) => desc,
            Err(e) => {
                tracing::error!("[PeerConnection] {}", e);
                observer.on_failure(e.to_string());
                return;
            }
        };
        if !self.advance(&NegotiationState::OfferCreating, NegotiationState::LocalDescriptionSetting) {
            tracing::warn!(
                "[PeerConnection] set_local_description ignored in state {:?}",
                self.state()
            );
            observer.on_failure(format!("{}: no pending offer", SET_LOCAL_ERROR));
            return;
        }

        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        self.signaling.spawn(async move {
            match backend.set_local_description(desc).await {
                Ok(()) => {
                    *state.lock() = NegotiationState::AwaitingRemoteAnswer;
                    tracing::debug!("[PeerConnection] Local description set");
                    observer.on_success(());
                }
                Err(e) => {
                    tracing::error!("[PeerConnection] {}: {}", SET_LOCAL_ERROR, e);
                    *state.lock() = NegotiationState::Failed(SET_LOCAL_ERROR.into());
                    observer.on_failure(SET_LOCAL_ERROR);
                }
            }
        });
    }

    /// Applies the remote answer. Same failure rules as the local side.
    pub fn set_remote_description(&self, kind: &str, sdp: &str, observer: SetSessionDescriptionObserver) {
        let desc = match SessionDescription::parse(kind, sdp) {
            Ok(desc) => desc,
            Err(e) => {
                tracing::error!("[PeerConnection] {}", e);
                observer.on_failure(e.to_string());
                return;
            }
        };
        if !self.advance(
            &NegotiationState::AwaitingRemoteAnswer,
            NegotiationState::RemoteDescriptionSetting,
        ) {
            tracing::warn!(
                "[PeerConnection] set_remote_description ignored in state {:?}",
                self.state()
            );
            observer.on_failure(format!("{}: no local offer applied", SET_REMOTE_ERROR));
            return;
        }

        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        self.signaling.spawn(async move {
            match backend.set_remote_description(desc).await {
                Ok(()) => {
                    *state.lock() = NegotiationState::Published;
                    tracing::info!("[PeerConnection] Remote description set");
                    observer.on_success(());
                }
                Err(e) => {
                    tracing::error!("[PeerConnection] {}: {}", SET_REMOTE_ERROR, e);
                    *state.lock() = NegotiationState::Failed(SET_REMOTE_ERROR.into());
                    observer.on_failure(SET_REMOTE_ERROR);
                }
            }
        });
    }

    /// Runs create-offer and set-local back to back with fresh observers and
    /// returns the SDP to send to the server. Stereo Opus is requested on the
    /// offer before it is applied.
    pub async fn negotiate_local(&self, exchange: &mut SessionDescriptionExchange) -> Result<String> {
        let (observer, created) = exchange
            .take_create_offer()
            .ok_or_else(|| StreamError::InvalidState("create offer observer already used".into()))?;
        self.create_offer(observer);
        let offer = created.wait().await?;
        let offer_sdp = sdp::enable_opus_stereo(offer.to_sdp());

        let (observer, applied) = exchange
            .take_set_local()
            .ok_or_else(|| StreamError::InvalidState("set local observer already used".into()))?;
        self.set_local_description(offer.kind().as_str(), &offer_sdp, observer);
        applied.wait().await?;

        Ok(self.backend.local_description().await.unwrap_or(offer_sdp))
    }

    /// Applies the server's answer using the exchange's remaining slot.
    pub async fn apply_answer(&self, exchange: &mut SessionDescriptionExchange, sdp: &str) -> Result<()> {
        let (observer, applied) = exchange
            .take_set_remote()
            .ok_or_else(|| StreamError::InvalidState("set remote observer already used".into()))?;
        self.set_remote_description(SdpType::Answer.as_str(), sdp, observer);
        applied.wait().await
    }

    pub async fn local_description(&self) -> Option<String> {
        self.backend.local_description().await
    }

    pub async fn close(&self) -> Result<()> {
        *self.state.lock() = NegotiationState::Closed;
        self.backend.close().await
    }
}
