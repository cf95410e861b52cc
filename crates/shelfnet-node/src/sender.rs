//! Builds and publishes the reply to a peer's request, at most once.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shelfnet_net::RelayTransport;
use shelfnet_shared::protocol::collapse_authors;
use shelfnet_shared::ResponseBook;
use shelfnet_store::{CatalogBook, Database};

use crate::client::Client;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted by this many relays.
    Published(usize),
    /// Already sent, suppressed, or another task holds the claim.
    AlreadyHandled,
    /// Every matched book was delivered by someone else meanwhile.
    NothingToSend,
    /// No relay accepted the reply; a later trigger may try again.
    Failed,
}

pub struct ResponseSender<T> {
    db: Arc<Mutex<Database>>,
    client: Arc<Client<T>>,
}

impl<T> Clone for ResponseSender<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            client: self.client.clone(),
        }
    }
}

impl<T: RelayTransport> ResponseSender<T> {
    pub fn new(db: Arc<Mutex<Database>>, client: Arc<Client<T>>) -> Self {
        Self { db, client }
    }

    /// Reply to `request_id` with the books still linked to it.
    pub async fn send(&self, request_id: &str) -> SendOutcome {
        let prepared = {
            let db = self.db.lock().await;
            match db.claim_send(request_id) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(request = %request_id, "Reply already handled");
                    return SendOutcome::AlreadyHandled;
                }
                Err(e) => {
                    warn!(request = %request_id, error = %e, "Failed to claim reply");
                    return SendOutcome::Failed;
                }
            }
            load_reply(&db, request_id)
        };

        let (requester, books) = match prepared {
            Ok(found) => found,
            Err(e) => {
                warn!(request = %request_id, error = %e, "Failed to load reply content");
                self.release(request_id).await;
                return SendOutcome::Failed;
            }
        };

        if books.is_empty() {
            debug!(request = %request_id, "No linked books left, nothing to send");
            if let Err(e) = self.db.lock().await.complete_send(request_id) {
                warn!(request = %request_id, error = %e, "Failed to settle empty reply");
            }
            return SendOutcome::NothingToSend;
        }

        match self.publish(request_id, &requester, books).await {
            Ok(accepted) => {
                if let Err(e) = self.db.lock().await.complete_send(request_id) {
                    warn!(request = %request_id, error = %e, "Reply published but not recorded");
                }
                info!(request = %request_id, accepted, "Reply sent");
                SendOutcome::Published(accepted)
            }
            Err(e) => {
                warn!(request = %request_id, error = %e, "Reply not published");
                self.release(request_id).await;
                SendOutcome::Failed
            }
        }
    }

    async fn publish(&self, request_id: &str, requester: &str, books: Vec<CatalogBook>) -> Result<usize> {
        let entries: Vec<ResponseBook> = books.into_iter().map(to_response_book).collect();
        let content = serde_json::to_string(&entries)?;
        let event = self
            .client
            .build_and_sign_response(request_id, requester, content)?;
        self.client.publish(&event).await
    }

    async fn release(&self, request_id: &str) {
        if let Err(e) = self.db.lock().await.release_send_claim(request_id) {
            warn!(request = %request_id, error = %e, "Failed to release reply claim");
        }
    }
}

fn load_reply(db: &Database, request_id: &str) -> Result<(String, Vec<CatalogBook>)> {
    let request = db.get_request(request_id)?;
    let ids: Vec<i64> = db
        .links_for_request(request_id)?
        .into_iter()
        .map(|link| link.book_id)
        .collect();
    Ok((request.sender_pubkey, db.catalog_books(&ids)?))
}

fn to_response_book(book: CatalogBook) -> ResponseBook {
    ResponseBook {
        id: book.book_id,
        title: book.title,
        authors: collapse_authors(book.authors),
        series: book.series,
        series_number: book.series_number,
        file_type: book.file_type,
        file_hash: book.file_hash,
        file_size: book.file_size,
        ipfs_cid: book.ipfs_cid,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use shelfnet_shared::protocol::parse_response;
    use shelfnet_shared::Identity;
    use shelfnet_store::{NewCatalogBook, NewRequest, NewResponse};

    use super::*;
    use crate::client::tests::{client, MockRelay};

    fn catalog_book(title: &str, authors: &[&str], hash: &str) -> NewCatalogBook {
        NewCatalogBook {
            title: title.to_string(),
            authors: authors.iter().map(|a| a.to_string()).collect(),
            file_type: "fb2".to_string(),
            file_size: 4096,
            file_hash: hash.to_string(),
            ..Default::default()
        }
    }

    async fn setup(accept: bool) -> (ResponseSender<MockRelay>, MockRelay, Arc<Mutex<Database>>) {
        let mut db = Database::open_in_memory().unwrap();
        db.add_catalog_book(&catalog_book("Dune", &[], "00000000000000a1"))
            .unwrap();
        db.add_catalog_book(&catalog_book(
            "Dune Omnibus",
            &["A", "B", "C", "D"],
            "00000000000000a2",
        ))
        .unwrap();
        let req = NewRequest {
            event_id: "q1".to_string(),
            sender_pubkey: "requester".to_string(),
            author: None,
            series: None,
            title: Some("dune".to_string()),
            file_hash: None,
            created_at: 0,
        };
        db.record_incoming_request(&req, Utc::now()).unwrap();

        let relay = MockRelay::new(accept);
        let db = Arc::new(Mutex::new(db));
        let client = Arc::new(client(Some(Identity::generate()), &relay));
        (ResponseSender::new(db.clone(), client), relay, db)
    }

    #[tokio::test]
    async fn publishes_once() {
        let (sender, relay, db) = setup(true).await;

        assert_eq!(sender.send("q1").await, SendOutcome::Published(2));
        assert_eq!(sender.send("q1").await, SendOutcome::AlreadyHandled);
        assert!(db.lock().await.get_request("q1").unwrap().sent);

        // Two relays, one event.
        let published = relay.published();
        assert_eq!(published.len(), 2);
        let event = &published[0];
        assert_eq!(event.reply_reference(), Some("q1"));
        assert_eq!(event.tag_values("p").collect::<Vec<_>>(), vec!["requester"]);

        let books = parse_response(&event.content).unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].authors, vec!["author not specified"]);
        assert_eq!(books[1].authors, vec!["collective of authors"]);
    }

    #[tokio::test]
    async fn concurrent_triggers_publish_once() {
        let (sender, relay, db) = setup(true).await;

        let a = tokio::spawn({
            let sender = sender.clone();
            async move { sender.send("q1").await }
        });
        let b = tokio::spawn({
            let sender = sender.clone();
            async move { sender.send("q1").await }
        });
        let outcomes = [a.await.unwrap(), b.await.unwrap()];

        let published = outcomes
            .iter()
            .filter(|o| matches!(o, SendOutcome::Published(_)))
            .count();
        assert_eq!(published, 1);
        assert!(outcomes.contains(&SendOutcome::AlreadyHandled));
        assert!(db.lock().await.get_request("q1").unwrap().sent);

        let ids: std::collections::HashSet<_> =
            relay.published().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn failure_leaves_request_unsent() {
        let (sender, _relay, db) = setup(false).await;

        assert_eq!(sender.send("q1").await, SendOutcome::Failed);
        assert!(!db.lock().await.get_request("q1").unwrap().sent);
        // Claim was released, so a later trigger may try again.
        assert!(db.lock().await.claim_send("q1").unwrap());
    }

    #[tokio::test]
    async fn nothing_left_settles_request() {
        let (sender, relay, db) = setup(true).await;
        // A faster peer delivered both books.
        let delivered: Vec<ResponseBook> = ["00000000000000a1", "00000000000000a2"]
            .iter()
            .map(|hash| ResponseBook {
                id: 1,
                title: "Dune".to_string(),
                authors: vec!["Someone".to_string()],
                series: None,
                series_number: None,
                file_type: "epub".to_string(),
                file_hash: hash.to_string(),
                file_size: 100,
                ipfs_cid: None,
            })
            .collect();
        let response = NewResponse {
            event_id: "r1".to_string(),
            responder_pubkey: "faster".to_string(),
            request_event_id: "q1".to_string(),
            raw_content: "[]".to_string(),
        };
        db.lock()
            .await
            .store_response(&response, &delivered, Utc::now(), false)
            .unwrap();

        assert_eq!(sender.send("q1").await, SendOutcome::NothingToSend);
        assert!(db.lock().await.get_request("q1").unwrap().sent);
        assert!(relay.published().is_empty());
    }
}
