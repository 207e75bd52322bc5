// src/notifications/mod.rs

//! Message bus publishing
//!
//! The core announces state changes on a message bus but never waits for or
//! reads a reply. Implementations:
//! - `LogBus`: Writes each message to tracing
//! - `MemoryBus`: Records messages in memory for inspection

use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

/// Topics published by the core
pub mod topics {
    pub const UPDATE_COMMENT: &str = "bodhi.update.comment";
    pub const UPDATE_EDIT: &str = "bodhi.update.edit";
    pub const UPDATE_EJECT: &str = "bodhi.update.eject";
    pub const UPDATE_KARMA_THRESHOLD: &str = "bodhi.update.karma.threshold.reach";
    pub const UPDATE_REQUEST_REVOKE: &str = "bodhi.update.request.revoke";
    pub const UPDATE_REQUIREMENTS_MET: &str = "bodhi.update.requirements_met.stable";
    pub const UPDATE_STATUS_TESTING: &str = "bodhi.update.status.testing";
    pub const COMPOSE_START: &str = "bodhi.compose.start";
    pub const COMPOSE_COMPOSING: &str = "bodhi.compose.composing";
    pub const COMPOSE_COMPLETE: &str = "bodhi.compose.complete";

    /// `bodhi.update.request.<request>`
    pub fn update_request(request: &str) -> String {
        format!("bodhi.update.request.{}", request)
    }

    /// `bodhi.update.complete.<request>`
    pub fn update_complete(request: &str) -> String {
        format!("bodhi.update.complete.{}", request)
    }
}

/// Fire-and-forget publisher
///
/// Implementations must not fail the caller; delivery problems are theirs
/// to log.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, message: Value);
}

/// Publishes by logging at info level
#[derive(Debug, Default)]
pub struct LogBus;

impl MessageBus for LogBus {
    fn publish(&self, topic: &str, message: Value) {
        info!("Publishing {}: {}", topic, message);
    }
}

/// Keeps every published message, in order
#[derive(Debug, Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<(String, Value)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn messages(&self) -> Vec<(String, Value)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Messages published on `topic`
    pub fn on_topic(&self, topic: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, v)| v)
            .collect()
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, message: Value) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((topic.to_string(), message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_bus_records_in_order() {
        let bus = MemoryBus::new();
        bus.publish(topics::COMPOSE_START, json!({"agent": "releng"}));
        bus.publish(&topics::update_request("stable"), json!({"alias": "X"}));

        let all = bus.messages();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].0, "bodhi.update.request.stable");
        assert_eq!(bus.on_topic(topics::COMPOSE_START)[0]["agent"], "releng");
        assert!(bus.on_topic(topics::COMPOSE_COMPLETE).is_empty());
    }
}
