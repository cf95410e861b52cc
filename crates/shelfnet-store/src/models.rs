//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the catalog layer as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A "book wanted" request seen on the network, ours or a peer's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookRequest {
    /// Hex event id, primary key.
    pub event_id: String,
    /// Hex public key of the requester.
    pub sender_pubkey: String,
    pub author: Option<String>,
    pub series: Option<String>,
    pub title: Option<String>,
    pub file_hash: Option<String>,
    /// Event timestamp as claimed by the sender (unix seconds).
    pub created_at: i64,
    /// When this node first recorded the request.
    pub received_at: DateTime<Utc>,
    /// Catalog matching has completed.
    pub processed: bool,
    /// A response was published, or sending was deliberately suppressed.
    pub sent: bool,
}

/// Fields of a request about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub event_id: String,
    pub sender_pubkey: String,
    pub author: Option<String>,
    pub series: Option<String>,
    pub title: Option<String>,
    pub file_hash: Option<String>,
    pub created_at: i64,
}

/// A local catalog candidate prepared for a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestBookLink {
    pub request_id: String,
    pub book_id: i64,
    pub file_hash: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A response event received from a peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivedResponse {
    pub event_id: String,
    pub responder_pubkey: String,
    /// The request this response answers.
    pub request_event_id: String,
    pub received_at: DateTime<Utc>,
    /// Event content exactly as received.
    pub raw_content: String,
    /// The contained books have been persisted.
    pub processed: bool,
}

/// Fields of a response about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResponse {
    pub event_id: String,
    pub responder_pubkey: String,
    pub request_event_id: String,
    pub raw_content: String,
}

/// Result of dropping links already satisfied by a peer's response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Links removed.
    pub removed: usize,
    /// The request lost its last link and was marked sent without replying.
    pub suppressed: bool,
}

/// What storing one response wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredResponse {
    /// Book rows inserted.
    pub books: usize,
    pub pruned: PruneOutcome,
}

/// One book entry of a received response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredResponseBook {
    pub response_id: String,
    /// Book id in the responder's catalog.
    pub remote_id: i64,
    pub title: String,
    pub authors: Vec<String>,
    pub series: Option<String>,
    pub series_number: Option<i64>,
    pub file_type: String,
    pub file_hash: String,
    pub file_size: i64,
    pub ipfs_cid: Option<String>,
}

// ---------------------------------------------------------------------------
// Friends
// ---------------------------------------------------------------------------

/// Reputation ledger entry for a peer that supplied content to us.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friend {
    pub pubkey: String,
    pub download_count: i64,
    pub last_download_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Search terms for the local catalog. Present fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    pub title: Option<String>,
    pub series: Option<String>,
    pub author: Option<String>,
    pub file_hash: Option<String>,
}

impl CatalogQuery {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.series.is_none()
            && self.author.is_none()
            && self.file_hash.is_none()
    }
}

impl From<&NewRequest> for CatalogQuery {
    fn from(req: &NewRequest) -> Self {
        Self {
            title: req.title.clone(),
            series: req.series.clone(),
            author: req.author.clone(),
            file_hash: req.file_hash.clone(),
        }
    }
}

/// Everything the response builder needs about one local book.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogBook {
    pub book_id: i64,
    pub title: String,
    pub authors: Vec<String>,
    pub series: Option<String>,
    pub series_number: Option<i64>,
    pub file_type: String,
    pub file_hash: String,
    pub file_size: i64,
    pub ipfs_cid: Option<String>,
}

/// A book to insert into the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCatalogBook {
    pub title: String,
    pub authors: Vec<String>,
    pub series: Option<(String, Option<i64>)>,
    pub file_type: String,
    pub file_size: i64,
    pub file_hash: String,
    pub ipfs_cid: Option<String>,
    pub annotation: Option<String>,
}
