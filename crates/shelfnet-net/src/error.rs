use thiserror::Error;

/// Errors produced while talking to a relay.
#[derive(Error, Debug)]
pub enum NetError {
    /// The WebSocket layer failed (handshake, I/O, protocol).
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A relay frame could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The relay sent a frame that is not a known NIP-01 message.
    #[error("Unexpected relay message: {0}")]
    Protocol(String),

    /// An operation did not finish in time.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// The relay closed the connection.
    #[error("Connection closed by relay")]
    Closed,

    /// The relay answered `OK` with `accepted = false`.
    #[error("Event rejected by relay: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
