//! v002 -- Request/response exchange tables.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Requests seen on the network (ours and foreign)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS nostr_book_requests (
    event_id      TEXT PRIMARY KEY NOT NULL,  -- hex event id
    sender_pubkey TEXT NOT NULL,              -- hex x-only pubkey
    author        TEXT,
    series        TEXT,
    title         TEXT,
    file_hash     TEXT,
    created_at    INTEGER NOT NULL,           -- unix seconds, as claimed by sender
    received_at   TEXT NOT NULL,              -- RFC-3339, local clock
    processed     INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    sent          INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    send_claimed  INTEGER NOT NULL DEFAULT 0  -- boolean 0/1, publish in flight
);

CREATE INDEX IF NOT EXISTS idx_requests_sender_received
    ON nostr_book_requests(sender_pubkey, received_at);

-- ----------------------------------------------------------------
-- Local catalog candidates for a request
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS nostr_request_books (
    request_id TEXT NOT NULL,                 -- FK -> nostr_book_requests(event_id)
    book_id    INTEGER NOT NULL,              -- local catalog id
    file_hash  TEXT NOT NULL,
    PRIMARY KEY (request_id, book_id),

    FOREIGN KEY (request_id) REFERENCES nostr_book_requests(event_id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Responses received from peers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS nostr_received_responses (
    event_id         TEXT PRIMARY KEY NOT NULL,
    responder_pubkey TEXT NOT NULL,
    request_event_id TEXT NOT NULL,           -- may reference a request we never saw
    received_at      TEXT NOT NULL,
    raw_content      TEXT NOT NULL,
    processed        INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_responses_request
    ON nostr_received_responses(request_event_id);

CREATE TABLE IF NOT EXISTS nostr_response_books (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    response_id   TEXT NOT NULL,              -- FK -> nostr_received_responses(event_id)
    remote_id     INTEGER NOT NULL,           -- book id in the responder's catalog
    title         TEXT NOT NULL,
    authors       TEXT NOT NULL,              -- JSON array
    series        TEXT,
    series_number INTEGER,
    file_type     TEXT NOT NULL,
    file_hash     TEXT NOT NULL,
    file_size     INTEGER NOT NULL,
    ipfs_cid      TEXT,

    FOREIGN KEY (response_id) REFERENCES nostr_received_responses(event_id) ON DELETE CASCADE
);

-- A fingerprint is unique per response, not globally.
CREATE UNIQUE INDEX IF NOT EXISTS idx_response_books_unique
    ON nostr_response_books(response_id, file_hash);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
