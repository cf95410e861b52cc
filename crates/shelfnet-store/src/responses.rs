use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use shelfnet_shared::ResponseBook;

use crate::database::{parse_ts, ts, Database};
use crate::error::Result;
use crate::models::{
    NewResponse, PruneOutcome, ReceivedResponse, StoredResponse, StoredResponseBook,
};

impl Database {
    /// `None` if the response was never seen, otherwise its processed flag.
    pub fn response_processed(&self, event_id: &str) -> Result<Option<bool>> {
        let processed = self
            .conn()
            .query_row(
                "SELECT processed FROM nostr_received_responses WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(processed)
    }

    /// Persist a response and its books, prune the links it satisfies, then
    /// mark it processed, all in one transaction.
    ///
    /// An existing unprocessed row left by an earlier failed attempt is
    /// reused. A fingerprint repeated within the response is stored once.
    /// If the referenced request is stored here, links to books the peer
    /// already delivered are removed; with `suppress` set, a request that
    /// loses its last link this way and has not replied yet is marked sent,
    /// so no redundant reply goes out. A request whose reply is currently
    /// being published is left alone.
    pub fn store_response(
        &mut self,
        response: &NewResponse,
        books: &[ResponseBook],
        received_at: DateTime<Utc>,
        suppress: bool,
    ) -> Result<StoredResponse> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO nostr_received_responses
                 (event_id, responder_pubkey, request_event_id, received_at, raw_content)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                response.event_id,
                response.responder_pubkey,
                response.request_event_id,
                ts(received_at),
                response.raw_content,
            ],
        )?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO nostr_response_books
                     (response_id, remote_id, title, authors, series, series_number,
                      file_type, file_hash, file_size, ipfs_cid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for book in books {
                let authors = serde_json::to_string(&book.authors)?;
                inserted += stmt.execute(params![
                    response.event_id,
                    book.id,
                    book.title,
                    authors,
                    book.series,
                    book.series_number,
                    book.file_type,
                    book.file_hash,
                    book.file_size,
                    book.ipfs_cid,
                ])?;
            }
        }

        let mut hashes: Vec<&str> = books.iter().map(|b| b.file_hash.as_str()).collect();
        hashes.sort_unstable();
        hashes.dedup();
        let pruned = prune_delivered_links(&tx, &response.request_event_id, &hashes, suppress)?;

        tx.execute(
            "UPDATE nostr_received_responses SET processed = 1 WHERE event_id = ?1",
            params![response.event_id],
        )?;
        tx.commit()?;

        Ok(StoredResponse {
            books: inserted,
            pruned,
        })
    }

    pub fn responses_for_request(&self, request_id: &str) -> Result<Vec<ReceivedResponse>> {
        let mut stmt = self.conn().prepare(
            "SELECT event_id, responder_pubkey, request_event_id, received_at, raw_content, processed
             FROM nostr_received_responses
             WHERE request_event_id = ?1
             ORDER BY received_at",
        )?;
        let rows = stmt.query_map(params![request_id], row_to_response)?;

        let mut responses = Vec::new();
        for row in rows {
            responses.push(row?);
        }
        Ok(responses)
    }

    pub fn response_books(&self, response_id: &str) -> Result<Vec<StoredResponseBook>> {
        let mut stmt = self.conn().prepare(
            "SELECT response_id, remote_id, title, authors, series, series_number,
                    file_type, file_hash, file_size, ipfs_cid
             FROM nostr_response_books
             WHERE response_id = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![response_id], row_to_response_book)?;

        let mut books = Vec::new();
        for row in rows {
            books.push(row?);
        }
        Ok(books)
    }
}

fn prune_delivered_links(
    conn: &Connection,
    request_id: &str,
    file_hashes: &[&str],
    suppress: bool,
) -> Result<PruneOutcome> {
    if file_hashes.is_empty() {
        return Ok(PruneOutcome::default());
    }

    let placeholders = vec!["?"; file_hashes.len()].join(", ");
    let sql = format!(
        "DELETE FROM nostr_request_books WHERE request_id = ? AND file_hash IN ({placeholders})"
    );
    let args = std::iter::once(request_id).chain(file_hashes.iter().copied());
    let removed = conn.execute(&sql, params_from_iter(args))?;

    let mut suppressed = false;
    if removed > 0 && suppress {
        let remaining: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nostr_request_books WHERE request_id = ?1",
            params![request_id],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            suppressed = conn.execute(
                "UPDATE nostr_book_requests SET sent = 1
                 WHERE event_id = ?1 AND sent = 0 AND send_claimed = 0",
                params![request_id],
            )? > 0;
        }
    }

    Ok(PruneOutcome {
        removed,
        suppressed,
    })
}

fn row_to_response(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReceivedResponse> {
    let received: String = row.get(3)?;
    Ok(ReceivedResponse {
        event_id: row.get(0)?,
        responder_pubkey: row.get(1)?,
        request_event_id: row.get(2)?,
        received_at: parse_ts(3, &received)?,
        raw_content: row.get(4)?,
        processed: row.get(5)?,
    })
}

fn row_to_response_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredResponseBook> {
    let authors_json: String = row.get(3)?;
    let authors = serde_json::from_str(&authors_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredResponseBook {
        response_id: row.get(0)?,
        remote_id: row.get(1)?,
        title: row.get(2)?,
        authors,
        series: row.get(4)?,
        series_number: row.get(5)?,
        file_type: row.get(6)?,
        file_hash: row.get(7)?,
        file_size: row.get(8)?,
        ipfs_cid: row.get(9)?,
    })
}
