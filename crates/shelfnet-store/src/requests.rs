use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::catalog::find_books;
use crate::database::{parse_ts, ts, Database};
use crate::error::{not_found, Result};
use crate::models::{BookRequest, CatalogQuery, NewRequest, RequestBookLink};

const REQUEST_COLUMNS: &str = "event_id, sender_pubkey, author, series, title, file_hash,
     created_at, received_at, processed, sent";

impl Database {
    pub fn request_exists(&self, event_id: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM nostr_book_requests WHERE event_id = ?1",
                params![event_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of requests from `sender` recorded at or after `since`.
    pub fn count_requests_since(&self, sender: &str, since: DateTime<Utc>) -> Result<u32> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM nostr_book_requests
             WHERE sender_pubkey = ?1 AND received_at >= ?2",
            params![sender, ts(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Record a peer's request and match it against the catalog in one
    /// transaction: insert the row, look up candidates, link each one and
    /// mark the request processed.
    ///
    /// Returns `None` when the event id is already recorded, otherwise the
    /// matched local book ids (possibly empty). Any error rolls the whole
    /// unit back, so a redelivered event is processed from scratch.
    pub fn record_incoming_request(
        &mut self,
        req: &NewRequest,
        received_at: DateTime<Utc>,
    ) -> Result<Option<Vec<i64>>> {
        let tx = self.conn_mut().transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO nostr_book_requests
                 (event_id, sender_pubkey, author, series, title, file_hash, created_at, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                req.event_id,
                req.sender_pubkey,
                req.author,
                req.series,
                req.title,
                req.file_hash,
                req.created_at,
                ts(received_at),
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }

        let matches = find_books(&tx, &CatalogQuery::from(req))?;
        {
            let mut link = tx.prepare(
                "INSERT OR IGNORE INTO nostr_request_books (request_id, book_id, file_hash)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (book_id, file_hash) in &matches {
                link.execute(params![req.event_id, book_id, file_hash])?;
            }
        }

        tx.execute(
            "UPDATE nostr_book_requests SET processed = 1 WHERE event_id = ?1",
            params![req.event_id],
        )?;
        tx.commit()?;

        Ok(Some(matches.into_iter().map(|(id, _)| id).collect()))
    }

    /// Record a request this node published itself. It needs no matching
    /// and no reply, so both flags are set.
    pub fn insert_own_request(&self, req: &NewRequest, received_at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO nostr_book_requests
                 (event_id, sender_pubkey, author, series, title, file_hash, created_at,
                  received_at, processed, sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, 1)",
            params![
                req.event_id,
                req.sender_pubkey,
                req.author,
                req.series,
                req.title,
                req.file_hash,
                req.created_at,
                ts(received_at),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_request(&self, event_id: &str) -> Result<BookRequest> {
        self.conn()
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM nostr_book_requests WHERE event_id = ?1"),
                params![event_id],
                row_to_request,
            )
            .map_err(not_found)
    }

    /// Requests published by `own_pubkey`, newest first.
    pub fn own_requests(&self, own_pubkey: &str, limit: u32) -> Result<Vec<BookRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM nostr_book_requests
             WHERE sender_pubkey = ?1 ORDER BY created_at DESC, received_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![own_pubkey, limit], row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    pub fn links_for_request(&self, request_id: &str) -> Result<Vec<RequestBookLink>> {
        let mut stmt = self.conn().prepare(
            "SELECT request_id, book_id, file_hash FROM nostr_request_books
             WHERE request_id = ?1 ORDER BY book_id",
        )?;
        let rows = stmt.query_map(params![request_id], |row| {
            Ok(RequestBookLink {
                request_id: row.get(0)?,
                book_id: row.get(1)?,
                file_hash: row.get(2)?,
            })
        })?;

        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    /// Atomically claim the right to publish the reply for a request.
    ///
    /// Succeeds for exactly one caller while the request is neither sent nor
    /// already claimed.
    pub fn claim_send(&self, request_id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE nostr_book_requests SET send_claimed = 1
             WHERE event_id = ?1 AND sent = 0 AND send_claimed = 0",
            params![request_id],
        )?;
        Ok(affected == 1)
    }

    /// The claimed publish succeeded.
    pub fn complete_send(&self, request_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE nostr_book_requests SET sent = 1, send_claimed = 0 WHERE event_id = ?1",
            params![request_id],
        )?;
        Ok(())
    }

    /// The claimed publish failed; leave `sent` unset so a later trigger
    /// may try again.
    pub fn release_send_claim(&self, request_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE nostr_book_requests SET send_claimed = 0 WHERE event_id = ?1",
            params![request_id],
        )?;
        Ok(())
    }

    /// Drop claims left behind by a process that died mid-publish.
    pub fn release_stale_send_claims(&self) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE nostr_book_requests SET send_claimed = 0 WHERE send_claimed = 1",
            [],
        )?;
        Ok(affected)
    }

    /// True when a recorded request still owes its reply: processed, not
    /// sent, not claimed, and with links left to send.
    pub fn reply_pending(&self, request_id: &str) -> Result<bool> {
        let pending = self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM nostr_book_requests r
                 WHERE r.event_id = ?1 AND r.processed = 1 AND r.sent = 0
                   AND r.send_claimed = 0
                   AND EXISTS(SELECT 1 FROM nostr_request_books l WHERE l.request_id = r.event_id))",
            params![request_id],
            |row| row.get(0),
        )?;
        Ok(pending)
    }

    /// Event id of the newest request this node published.
    pub fn latest_sent_own_request(&self, own_pubkey: &str) -> Result<Option<String>> {
        let id = self
            .conn()
            .query_row(
                "SELECT event_id FROM nostr_book_requests
                 WHERE sender_pubkey = ?1 AND sent = 1
                 ORDER BY created_at DESC, received_at DESC LIMIT 1",
                params![own_pubkey],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookRequest> {
    let received: String = row.get(7)?;
    Ok(BookRequest {
        event_id: row.get(0)?,
        sender_pubkey: row.get(1)?,
        author: row.get(2)?,
        series: row.get(3)?,
        title: row.get(4)?,
        file_hash: row.get(5)?,
        created_at: row.get(6)?,
        received_at: parse_ts(7, &received)?,
        processed: row.get(8)?,
        sent: row.get(9)?,
    })
}
