//! Relay connection tracking.
//!
//! Keeps the current [`ConnectionState`] of every relay loop so the node
//! can log a summary and tests can observe transitions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use shelfnet_shared::ConnectionState;

/// Shared map of relay URL to loop state. Cloning shares the map.
#[derive(Debug, Clone, Default)]
pub struct RelayTracker {
    states: Arc<RwLock<HashMap<String, ConnectionState>>>,
}

impl RelayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition, logging only actual changes.
    pub fn set(&self, relay: &str, state: ConnectionState) {
        let Ok(mut states) = self.states.write() else {
            return;
        };
        let previous = states.insert(relay.to_string(), state);
        if previous != Some(state) {
            debug!(relay = %relay, %state, "relay state changed");
        }
    }

    pub fn get(&self, relay: &str) -> ConnectionState {
        self.states
            .read()
            .ok()
            .and_then(|states| states.get(relay).copied())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Number of relays currently subscribed or receiving.
    pub fn live_count(&self) -> usize {
        self.states.read().map_or(0, |states| {
            states
                .values()
                .filter(|s| matches!(s, ConnectionState::Subscribed | ConnectionState::Receiving))
                .count()
        })
    }

    pub fn snapshot(&self) -> Vec<(String, ConnectionState)> {
        let mut all: Vec<_> = self
            .states
            .read()
            .map(|states| states.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_and_counts() {
        let tracker = RelayTracker::new();
        assert_eq!(tracker.get("wss://a"), ConnectionState::Disconnected);

        tracker.set("wss://a", ConnectionState::Receiving);
        tracker.set("wss://b", ConnectionState::Connecting);
        let shared = tracker.clone();
        shared.set("wss://c", ConnectionState::Subscribed);

        assert_eq!(tracker.live_count(), 2);
        assert_eq!(tracker.snapshot().len(), 3);
        assert_eq!(tracker.get("wss://b"), ConnectionState::Connecting);
    }
}
