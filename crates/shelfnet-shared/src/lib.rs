// Identity, signed events and payload rules shared by every shelfnet crate.

pub mod constants;
pub mod error;
pub mod event;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{EventError, IdentityError, ShelfnetError, ValidationError};
pub use event::{Event, EventBuilder, Tag};
pub use identity::{normalize_pubkey, Identity};
pub use protocol::{RequestPayload, ResponseBook};
pub use types::{ConnectionState, EventKinds};
