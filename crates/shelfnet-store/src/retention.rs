//! Garbage collection of exchange state.
//!
//! Both passes are idempotent and safe to run while relay tasks are active,
//! since every caller goes through the same serialized handle.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::{ts, Database};
use crate::error::Result;

/// Rows removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub requests: usize,
    pub responses: usize,
}

impl Database {
    /// Delete requests from other senders recorded before `older_than`,
    /// together with their links and any responses addressed to them.
    pub fn delete_stale_foreign_requests(
        &mut self,
        own_pubkey: Option<&str>,
        older_than: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let cutoff = ts(older_than);
        let own = own_pubkey.unwrap_or("");
        let tx = self.conn_mut().transaction()?;

        let responses = tx.execute(
            "DELETE FROM nostr_received_responses WHERE request_event_id IN (
                 SELECT event_id FROM nostr_book_requests
                 WHERE sender_pubkey != ?1 AND received_at < ?2)",
            params![own, cutoff],
        )?;
        let requests = tx.execute(
            "DELETE FROM nostr_book_requests WHERE sender_pubkey != ?1 AND received_at < ?2",
            params![own, cutoff],
        )?;

        tx.commit()?;
        Ok(CleanupReport {
            requests,
            responses,
        })
    }

    /// Delete every response that does not answer the newest request this
    /// node published. Without such a request, all responses go.
    pub fn delete_unrelated_responses(&self, own_pubkey: Option<&str>) -> Result<usize> {
        let latest = match own_pubkey {
            Some(own) => self.latest_sent_own_request(own)?,
            None => None,
        };

        let removed = match latest {
            Some(request_id) => self.conn().execute(
                "DELETE FROM nostr_received_responses WHERE request_event_id != ?1",
                params![request_id],
            )?,
            None => self
                .conn()
                .execute("DELETE FROM nostr_received_responses", [])?,
        };
        Ok(removed)
    }

    /// Run both retention passes.
    pub fn run_cleanup(
        &mut self,
        own_pubkey: Option<&str>,
        older_than: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let mut report = self.delete_stale_foreign_requests(own_pubkey, older_than)?;
        report.responses += self.delete_unrelated_responses(own_pubkey)?;

        tracing::debug!(
            requests = report.requests,
            responses = report.responses,
            "retention pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::requests::tests::{db_with_books, new_request};
    use crate::responses::tests::{new_response, response_book};

    #[test]
    fn stale_foreign_requests_cascade() {
        let mut db = db_with_books();
        let now = Utc::now();
        db.record_incoming_request(&new_request("old", "peer", "dune"), now - Duration::days(8))
            .unwrap();
        db.record_incoming_request(&new_request("fresh", "peer", "dune"), now)
            .unwrap();
        db.insert_own_request(&new_request("mine", "me", "dune"), now - Duration::days(30))
            .unwrap();
        db.store_response(
            &new_response("r-old", "old"),
            &[response_book(1, "00000000000000c1")],
            now,
            true,
        )
        .unwrap();

        let report = db
            .delete_stale_foreign_requests(Some("me"), now - Duration::days(7))
            .unwrap();
        assert_eq!(report.requests, 1);
        assert_eq!(report.responses, 1);

        assert!(!db.request_exists("old").unwrap());
        assert!(db.links_for_request("old").unwrap().is_empty());
        assert!(db.response_books("r-old").unwrap().is_empty());
        assert!(db.request_exists("fresh").unwrap());
        assert!(db.request_exists("mine").unwrap());

        // Second run finds nothing.
        let again = db
            .delete_stale_foreign_requests(Some("me"), now - Duration::days(7))
            .unwrap();
        assert_eq!(again, CleanupReport::default());
    }

    #[test]
    fn only_latest_own_request_keeps_responses() {
        let mut db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let mut older = new_request("q-old", "me", "dune");
        older.created_at = 100;
        let mut newer = new_request("q-new", "me", "hyperion");
        newer.created_at = 200;
        db.insert_own_request(&older, now).unwrap();
        db.insert_own_request(&newer, now).unwrap();

        let books = [response_book(1, "00000000000000c1")];
        db.store_response(&new_response("r1", "q-old"), &books, now, true)
            .unwrap();
        db.store_response(&new_response("r2", "q-new"), &books, now, true)
            .unwrap();
        db.store_response(&new_response("r3", "unknown"), &books, now, true)
            .unwrap();

        assert_eq!(db.delete_unrelated_responses(Some("me")).unwrap(), 2);
        assert_eq!(db.response_processed("r2").unwrap(), Some(true));
        assert_eq!(db.response_processed("r1").unwrap(), None);
        assert_eq!(db.delete_unrelated_responses(Some("me")).unwrap(), 0);
    }

    #[test]
    fn without_own_request_all_responses_go() {
        let mut db = Database::open_in_memory().unwrap();
        let books = [response_book(1, "00000000000000c1")];
        db.store_response(&new_response("r1", "q1"), &books, Utc::now(), true)
            .unwrap();

        let report = db.run_cleanup(None, Utc::now() - Duration::days(7)).unwrap();
        assert_eq!(report.responses, 1);
        assert!(db.response_books("r1").unwrap().is_empty());
    }
}
