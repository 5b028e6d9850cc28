// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Director authentication and WebSocket signaling.

mod director;
mod events;
mod messages;
mod websocket;

pub use director::{
    parse_director_response, DirectorClient, DirectorResponse, IceServer, PublishCredentials,
    DIRECTOR_TIMEOUT,
};
pub use events::{
    parse_viewer_count, EventCallbackTable, EventHandler, EVENT_ACTIVE, EVENT_INACTIVE,
    EVENT_VIEWER_COUNT,
};
pub use messages::{PublishCommand, PublishData, SignalingMessage};
pub use websocket::{connect_url, user_agent, SignalingSocket, SocketEvent, CONNECT_ERROR};
