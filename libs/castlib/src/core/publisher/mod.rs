// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host-facing publisher API.

mod session;
mod source;

pub use session::{PublishSession, PublishState, PublisherEvent, WEBSOCKET_CLOSED_ERROR};
pub use source::{CapturedTracks, PublisherSource};
