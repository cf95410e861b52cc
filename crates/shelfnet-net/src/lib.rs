// Relay networking: NIP-01 over WebSocket, per-relay subscription loops
// with backoff, and fan-out publishing.

pub mod backoff;
pub mod error;
pub mod messages;
pub mod publish;
pub mod subscription;
pub mod tracker;
pub mod transport;

pub use backoff::Backoff;
pub use error::NetError;
pub use messages::{ClientMessage, Filter, RelayMessage};
pub use publish::{publish_to_relay, publish_to_relays, PublishConfig};
pub use subscription::{EventHandler, SubscriptionConfig, SubscriptionManager};
pub use tracker::RelayTracker;
pub use transport::{RelaySession, RelayTransport, WsSession, WsTransport};
