use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShelfnetError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("No secret key configured")]
    MissingSecretKey,

    #[error("Signing failed")]
    SigningFailed,
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event id does not match its content")]
    IdMismatch,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed field: {0}")]
    Malformed(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least one of author, series, title or file hash is required")]
    Empty,

    #[error("{field} must be at least {min} characters")]
    TooShort { field: &'static str, min: usize },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{0} contains control characters")]
    DisallowedCharacters(&'static str),

    #[error("File hash must be exactly 16 lowercase hex characters")]
    BadFileHash,

    #[error("Response contains no books")]
    NoBooks,

    #[error("Malformed payload: {0}")]
    Malformed(String),
}
