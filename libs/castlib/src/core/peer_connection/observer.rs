// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Single-use completion slots for the three negotiation steps.
//!
//! An [`Observer`] is consumed by whichever of `on_success`/`on_failure`
//! runs first, so a slot can fire at most once. The paired
//! [`ObserverResult`] resolves when it does. Dropping an observer without
//! firing it resolves the result with a negotiation error.

use super::description::SessionDescription;
use crate::core::{Result, StreamError};
use tokio::sync::oneshot;

type Outcome<T> = std::result::Result<T, String>;

pub struct Observer<T> {
    label: &'static str,
    tx: oneshot::Sender<Outcome<T>>,
}

impl<T> Observer<T> {
    pub fn channel(label: &'static str) -> (Observer<T>, ObserverResult<T>) {
        let (tx, rx) = oneshot::channel();
        (Observer { label, tx }, ObserverResult { label, rx })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn on_success(self, value: T) {
        if self.tx.send(Ok(value)).is_err() {
            tracing::debug!("[PeerConnection] {} result no longer awaited", self.label);
        }
    }

    pub fn on_failure(self, error: impl Into<String>) {
        let error = error.into();
        tracing::debug!("[PeerConnection] {} failed: {}", self.label, error);
        let _ = self.tx.send(Err(error));
    }
}

/// Receiving half of an [`Observer`].
pub struct ObserverResult<T> {
    label: &'static str,
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> ObserverResult<T> {
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(StreamError::Negotiation(message)),
            Err(_) => Err(StreamError::Negotiation(format!(
                "{} observer dropped before completion",
                self.label
            ))),
        }
    }
}

pub type CreateSessionDescriptionObserver = Observer<SessionDescription>;
pub type SetSessionDescriptionObserver = Observer<()>;

/// Fresh observer slots for one offer/answer cycle.
pub struct SessionDescriptionExchange {
    create_offer: Option<(
        CreateSessionDescriptionObserver,
        ObserverResult<SessionDescription>,
    )>,
    set_local: Option<(SetSessionDescriptionObserver, ObserverResult<()>)>,
    set_remote: Option<(SetSessionDescriptionObserver, ObserverResult<()>)>,
}

impl SessionDescriptionExchange {
    pub fn new() -> Self {
        Self {
            create_offer: Some(Observer::channel("create offer")),
            set_local: Some(Observer::channel("set local description")),
            set_remote: Some(Observer::channel("set remote description")),
        }
    }

    pub fn take_create_offer(
        &mut self,
    ) -> Option<(
        CreateSessionDescriptionObserver,
        ObserverResult<SessionDescription>,
    )> {
        self.create_offer.take()
    }

    pub fn take_set_local(&mut self) -> Option<(SetSessionDescriptionObserver, ObserverResult<()>)> {
        self.set_local.take()
    }

    pub fn take_set_remote(
        &mut self,
    ) -> Option<(SetSessionDescriptionObserver, ObserverResult<()>)> {
        self.set_remote.take()
    }
}

impl Default for SessionDescriptionExchange {
    fn default() -> Self {
        Self::new()
    }
}
