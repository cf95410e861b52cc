use thiserror::Error;

use shelfnet_shared::{EventError, IdentityError, ValidationError};
use shelfnet_store::StoreError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Publishing is disabled: no secret key configured")]
    PublishingDisabled,

    #[error("No relay accepted event {0}")]
    NoRelayAccepted(String),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Blacklist I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;
