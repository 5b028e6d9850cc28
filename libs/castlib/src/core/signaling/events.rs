// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Handlers for server-pushed signaling events.

use serde_json::Value;
use std::sync::Arc;

pub const EVENT_ACTIVE: &str = "active";
pub const EVENT_INACTIVE: &str = "inactive";
pub const EVENT_VIEWER_COUNT: &str = "viewercount";

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Event name to handler, in registration order. The names double as the
/// `events` list of the publish command.
#[derive(Clone, Default)]
pub struct EventCallbackTable {
    entries: Vec<(String, EventHandler)>,
}

impl EventCallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. A name can only be registered once.
    pub fn register(&mut self, name: impl Into<String>, handler: EventHandler) {
        let name = name.into();
        if self.contains(&name) {
            tracing::warn!("[Signaling] Event '{}' already has a handler", name);
            return;
        }
        self.entries.push((name, handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Runs the handler for `name`. Unknown names are logged and skipped.
    pub fn dispatch(&self, name: &str, payload: &Value) -> bool {
        match self.entries.iter().find(|(n, _)| n == name) {
            Some((_, handler)) => {
                handler(payload);
                true
            }
            None => {
                tracing::warn!("[Signaling] No handler for event '{}'", name);
                false
            }
        }
    }
}

/// `data.viewercount` of a viewercount event.
pub fn parse_viewer_count(payload: &Value) -> Option<i64> {
    payload.get("data")?.get("viewercount")?.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_known_and_unknown() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = EventCallbackTable::new();
        let counter = Arc::clone(&hits);
        table.register(
            EVENT_ACTIVE,
            Arc::new(move |_payload: &Value| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(table.dispatch("active", &Value::Null));
        assert!(!table.dispatch("stopped", &Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_names_keep_order_and_ignore_duplicates() {
        let mut table = EventCallbackTable::new();
        for name in [EVENT_ACTIVE, EVENT_INACTIVE, EVENT_VIEWER_COUNT, EVENT_ACTIVE] {
            table.register(name, Arc::new(|_payload: &Value| {}));
        }
        assert_eq!(table.names(), vec!["active", "inactive", "viewercount"]);
    }

    #[test]
    fn test_viewer_count() {
        let payload = serde_json::json!({"type":"event","name":"viewercount","data":{"viewercount":12}});
        assert_eq!(parse_viewer_count(&payload), Some(12));
        assert_eq!(parse_viewer_count(&serde_json::json!({"data":{}})), None);
    }
}
