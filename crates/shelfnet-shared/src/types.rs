use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_REQUEST_KIND, DEFAULT_RESPONSE_KIND};

/// The pair of event kinds this network speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventKinds {
    pub request: u16,
    pub response: u16,
}

impl EventKinds {
    pub fn all(&self) -> [u16; 2] {
        [self.request, self.response]
    }
}

impl Default for EventKinds {
    fn default() -> Self {
        Self {
            request: DEFAULT_REQUEST_KIND,
            response: DEFAULT_RESPONSE_KIND,
        }
    }
}

/// Lifecycle of one relay subscription loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Receiving => "receiving",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
