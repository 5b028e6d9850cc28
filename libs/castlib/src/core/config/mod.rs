// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Publisher configuration.

mod publisher_config;

pub use publisher_config::{
    AudioCaptureConfig, BitrateSettings, PublisherConfig, VideoCaptureConfig,
    DEFAULT_STREAM_URL,
};
