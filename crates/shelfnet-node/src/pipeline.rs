//! Incoming event processing.
//!
//! Every verified event from every relay lands in [`Pipeline::handle_event`],
//! which routes it to the request or response path by kind. Each step that
//! rejects an event returns an outcome instead of an error: a dropped event
//! is normal operation, not a failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use shelfnet_net::{EventHandler, RelayTransport};
use shelfnet_shared::protocol::parse_response;
use shelfnet_shared::{normalize_pubkey, Event, RequestPayload};
use shelfnet_store::{Database, NewRequest, NewResponse};

use crate::blacklist::Blacklist;
use crate::client::Client;
use crate::rate_limit::RequestLimits;
use crate::sender::{ResponseSender, SendOutcome};

/// What happened to an incoming request.
#[derive(Debug)]
pub enum RequestOutcome {
    Own,
    Blacklisted,
    RateLimited,
    Duplicate,
    /// Already recorded, but its reply never went out; the reply was
    /// triggered again.
    RetryingReply {
        reply: JoinHandle<SendOutcome>,
    },
    Invalid,
    /// Recorded with no local match.
    NoMatch,
    /// Recorded and matched; a reply task was spawned.
    Matched {
        books: usize,
        reply: JoinHandle<SendOutcome>,
    },
    StorageFailed,
}

/// What happened to an incoming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Own,
    Invalid,
    NoRequestReference,
    Blacklisted,
    Duplicate,
    Stored {
        books: usize,
        links_removed: usize,
        suppressed: bool,
    },
    StorageFailed,
}

pub struct Pipeline<T> {
    db: Arc<Mutex<Database>>,
    blacklist: Arc<Blacklist>,
    client: Arc<Client<T>>,
    sender: ResponseSender<T>,
    limits: RequestLimits,
    suppress_redundant_replies: bool,
    own_pubkey: Option<String>,
}

impl<T: RelayTransport> Pipeline<T> {
    pub fn new(
        db: Arc<Mutex<Database>>,
        blacklist: Arc<Blacklist>,
        client: Arc<Client<T>>,
        limits: RequestLimits,
        suppress_redundant_replies: bool,
    ) -> Self {
        let own_pubkey = client.public_key();
        Self {
            sender: ResponseSender::new(db.clone(), client.clone()),
            db,
            blacklist,
            client,
            limits,
            suppress_redundant_replies,
            own_pubkey,
        }
    }

    fn is_own(&self, sender: &str) -> bool {
        self.own_pubkey.as_deref() == Some(sender)
    }

    pub async fn handle_request(&self, event: Event) -> RequestOutcome {
        let Some(sender) = normalize_pubkey(&event.pubkey) else {
            return RequestOutcome::Invalid;
        };
        if self.is_own(&sender) {
            return RequestOutcome::Own;
        }
        if self.blacklist.is_sender_blocked(&sender) {
            trace!(sender = %sender, "Dropping request from blacklisted sender");
            return RequestOutcome::Blacklisted;
        }

        let now = Utc::now();
        let mut db = self.db.lock().await;

        match self.limits.check(&db, &sender, now) {
            Ok(true) => {}
            Ok(false) => return RequestOutcome::RateLimited,
            Err(e) => {
                warn!(event = %event.short_id(), error = %e, "Rate limit lookup failed");
                return RequestOutcome::StorageFailed;
            }
        }

        let exists = db.request_exists(&event.id);
        match exists {
            Ok(false) => {}
            Ok(true) => {
                // A redelivery is the only retry trigger for a reply whose
                // earlier publish failed.
                let pending = db.reply_pending(&event.id);
                return match pending {
                    Ok(true) => {
                        drop(db);
                        debug!(event = %event.short_id(), "Redelivered request still owes a reply");
                        RequestOutcome::RetryingReply {
                            reply: self.spawn_reply(event.id),
                        }
                    }
                    Ok(false) => RequestOutcome::Duplicate,
                    Err(e) => {
                        warn!(event = %event.short_id(), error = %e, "Reply state lookup failed");
                        RequestOutcome::StorageFailed
                    }
                };
            }
            Err(e) => {
                warn!(event = %event.short_id(), error = %e, "Request lookup failed");
                return RequestOutcome::StorageFailed;
            }
        }

        let payload = match RequestPayload::from_json(&event.content)
            .and_then(|p| p.validate().map(|()| p))
        {
            Ok(payload) => payload,
            Err(e) => {
                debug!(event = %event.short_id(), error = %e, "Dropping invalid request");
                return RequestOutcome::Invalid;
            }
        };

        let request = NewRequest {
            event_id: event.id.clone(),
            sender_pubkey: sender,
            author: payload.author,
            series: payload.series,
            title: payload.title,
            file_hash: payload.file_hash,
            created_at: event.created_at,
        };

        let matches = match db.record_incoming_request(&request, now) {
            Ok(Some(matches)) => matches,
            Ok(None) => return RequestOutcome::Duplicate,
            Err(e) => {
                warn!(event = %event.short_id(), error = %e, "Failed to record request");
                return RequestOutcome::StorageFailed;
            }
        };
        drop(db);

        debug!(event = %event.short_id(), matches = matches.len(), "Request recorded");
        if matches.is_empty() {
            return RequestOutcome::NoMatch;
        }
        if !self.client.is_enabled() {
            debug!(event = %event.short_id(), "Matched, but publishing is disabled");
        }

        RequestOutcome::Matched {
            books: matches.len(),
            reply: self.spawn_reply(event.id),
        }
    }

    fn spawn_reply(&self, request_id: String) -> JoinHandle<SendOutcome> {
        let sender = self.sender.clone();
        tokio::spawn(async move { sender.send(&request_id).await })
    }

    pub async fn handle_response(&self, event: Event) -> ResponseOutcome {
        let Some(sender) = normalize_pubkey(&event.pubkey) else {
            return ResponseOutcome::Invalid;
        };
        if self.is_own(&sender) {
            return ResponseOutcome::Own;
        }

        let books = match parse_response(&event.content) {
            Ok(books) => books,
            Err(e) => {
                debug!(event = %event.short_id(), error = %e, "Dropping invalid response");
                return ResponseOutcome::Invalid;
            }
        };

        let Some(request_id) = event.reply_reference().map(str::to_string) else {
            debug!(event = %event.short_id(), "Response without request reference");
            return ResponseOutcome::NoRequestReference;
        };

        if self.blacklist.is_sender_blocked(&sender)
            || books
                .iter()
                .any(|b| self.blacklist.is_content_blocked(&b.file_hash))
        {
            trace!(event = %event.short_id(), "Dropping blacklisted response");
            return ResponseOutcome::Blacklisted;
        }

        let now = Utc::now();
        let mut db = self.db.lock().await;

        match db.response_processed(&event.id) {
            Ok(Some(true)) => return ResponseOutcome::Duplicate,
            Ok(_) => {}
            Err(e) => {
                warn!(event = %event.short_id(), error = %e, "Response lookup failed");
                return ResponseOutcome::StorageFailed;
            }
        }

        let response = NewResponse {
            event_id: event.id.clone(),
            responder_pubkey: sender.clone(),
            request_event_id: request_id.clone(),
            raw_content: event.content.clone(),
        };
        let stored = match db.store_response(&response, &books, now, self.suppress_redundant_replies) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(event = %event.short_id(), error = %e, "Failed to store response");
                return ResponseOutcome::StorageFailed;
            }
        };

        if let Err(e) = db.touch_friend(&sender, now) {
            warn!(sender = %sender, error = %e, "Failed to update friend ledger");
        }

        debug!(
            event = %event.short_id(),
            request = %request_id,
            books = stored.books,
            links_removed = stored.pruned.removed,
            suppressed = stored.pruned.suppressed,
            "Response stored"
        );
        ResponseOutcome::Stored {
            books: stored.books,
            links_removed: stored.pruned.removed,
            suppressed: stored.pruned.suppressed,
        }
    }
}

#[async_trait]
impl<T: RelayTransport> EventHandler for Pipeline<T> {
    async fn handle_event(&self, relay: &str, event: Event) {
        let kinds = self.client.kinds();
        if event.kind == kinds.request {
            let outcome = self.handle_request(event).await;
            trace!(relay = %relay, ?outcome, "request handled");
        } else if event.kind == kinds.response {
            let outcome = self.handle_response(event).await;
            trace!(relay = %relay, ?outcome, "response handled");
        } else {
            trace!(relay = %relay, kind = event.kind, "ignoring event kind");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shelfnet_shared::{EventBuilder, Identity, ResponseBook};
    use shelfnet_store::NewCatalogBook;

    use super::*;
    use crate::client::tests::{client, MockRelay};

    struct Harness {
        pipeline: Pipeline<MockRelay>,
        db: Arc<Mutex<Database>>,
        blacklist: Arc<Blacklist>,
        relay: MockRelay,
        own: Identity,
    }

    fn harness(limits: RequestLimits) -> Harness {
        let mut db = Database::open_in_memory().unwrap();
        for (title, hash) in [("Dune", "00000000000000a1"), ("Dune Messiah", "00000000000000a2")] {
            db.add_catalog_book(&NewCatalogBook {
                title: title.to_string(),
                authors: vec!["Frank Herbert".to_string()],
                file_type: "fb2".to_string(),
                file_size: 1024,
                file_hash: hash.to_string(),
                ..Default::default()
            })
            .unwrap();
        }

        let own = Identity::generate();
        let relay = MockRelay::new(true);
        let db = Arc::new(Mutex::new(db));
        let blacklist = Arc::new(Blacklist::new());
        let client = Arc::new(client(Some(own.clone()), &relay));
        let pipeline = Pipeline::new(db.clone(), blacklist.clone(), client, limits, true);
        Harness {
            pipeline,
            db,
            blacklist,
            relay,
            own,
        }
    }

    fn request(from: &Identity, content: serde_json::Value) -> Event {
        EventBuilder::new(8698, content.to_string())
            .sign(from)
            .unwrap()
    }

    fn response(from: &Identity, request_id: &str, hashes: &[&str]) -> Event {
        let books: Vec<ResponseBook> = hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| ResponseBook {
                id: i as i64 + 1,
                title: format!("Book {i}"),
                authors: vec!["Someone".to_string()],
                series: None,
                series_number: None,
                file_type: "epub".to_string(),
                file_hash: hash.to_string(),
                file_size: 100,
                ipfs_cid: None,
            })
            .collect();
        EventBuilder::new(8699, serde_json::to_string(&books).unwrap())
            .tag(["e", request_id, "", "reply"])
            .tag(["p", "someone"])
            .sign(from)
            .unwrap()
    }

    async fn request_count(db: &Mutex<Database>) -> i64 {
        db.lock()
            .await
            .conn()
            .query_row("SELECT COUNT(*) FROM nostr_book_requests", [], |r| r.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn matched_request_gets_one_reply() {
        let h = harness(RequestLimits::default());
        let peer = Identity::generate();
        let event = request(&peer, json!({"title": "dune", "source": "test"}));

        let RequestOutcome::Matched { books, reply } = h.pipeline.handle_request(event.clone()).await
        else {
            panic!("expected a match");
        };
        assert_eq!(books, 2);
        assert_eq!(reply.await.unwrap(), SendOutcome::Published(2));

        // Redelivery: one row, no second send.
        assert!(matches!(
            h.pipeline.handle_request(event.clone()).await,
            RequestOutcome::Duplicate
        ));
        assert_eq!(request_count(&h.db).await, 1);

        let replies = h.relay.published();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|e| e.reply_reference() == Some(event.id.as_str())));
        assert!(replies
            .iter()
            .all(|e| e.tag_values("p").next() == Some(peer.public_key_hex().as_str())));
    }

    #[tokio::test]
    async fn redelivery_retries_failed_reply() {
        let h = harness(RequestLimits::default());
        let peer = Identity::generate();
        let event = request(&peer, json!({"title": "dune", "source": "test"}));

        h.relay.set_accepting(false);
        let RequestOutcome::Matched { reply, .. } = h.pipeline.handle_request(event.clone()).await
        else {
            panic!("expected a match");
        };
        assert_eq!(reply.await.unwrap(), SendOutcome::Failed);
        assert!(!h.db.lock().await.get_request(&event.id).unwrap().sent);

        h.relay.set_accepting(true);
        let RequestOutcome::RetryingReply { reply } = h.pipeline.handle_request(event.clone()).await
        else {
            panic!("expected the reply to be retried");
        };
        assert_eq!(reply.await.unwrap(), SendOutcome::Published(2));
        assert!(h.db.lock().await.get_request(&event.id).unwrap().sent);
        assert_eq!(request_count(&h.db).await, 1);

        // Once sent, redelivery is a plain duplicate.
        assert!(matches!(
            h.pipeline.handle_request(event).await,
            RequestOutcome::Duplicate
        ));
    }

    #[tokio::test]
    async fn empty_and_short_requests_are_dropped() {
        let h = harness(RequestLimits::default());
        let peer = Identity::generate();

        for content in [
            json!({"source": "test"}),
            json!({"title": "   ", "author": ""}),
            json!({"title": "Dun"}),
            json!({"series": "abc"}),
            json!({"file_hash": "NOTAHASH"}),
        ] {
            assert!(matches!(
                h.pipeline.handle_request(request(&peer, content)).await,
                RequestOutcome::Invalid
            ));
        }
        let garbage = EventBuilder::new(8698, "not json").sign(&peer).unwrap();
        assert!(matches!(
            h.pipeline.handle_request(garbage).await,
            RequestOutcome::Invalid
        ));
        assert_eq!(request_count(&h.db).await, 0);
    }

    #[tokio::test]
    async fn own_and_blacklisted_requests_are_dropped() {
        let h = harness(RequestLimits::default());
        let own = request(&h.own, json!({"title": "dune"}));
        assert!(matches!(
            h.pipeline.handle_request(own).await,
            RequestOutcome::Own
        ));

        let banned = Identity::generate();
        h.blacklist.add(&banned.public_key_hex());
        assert!(matches!(
            h.pipeline
                .handle_request(request(&banned, json!({"title": "dune"})))
                .await,
            RequestOutcome::Blacklisted
        ));
        assert_eq!(request_count(&h.db).await, 0);
    }

    #[tokio::test]
    async fn rate_limit_caps_daily_requests() {
        let h = harness(RequestLimits::new(3, 1, 2));
        let peer = Identity::generate();

        let mut accepted = 0;
        for i in 0..6 {
            let event = request(&peer, json!({"title": format!("nothing here {i}")}));
            match h.pipeline.handle_request(event).await {
                RequestOutcome::NoMatch => accepted += 1,
                RequestOutcome::RateLimited => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(accepted, 3);

        // Two downloads from this peer raise the allowance by two.
        {
            let db = h.db.lock().await;
            db.record_download(&peer.public_key_hex(), Utc::now()).unwrap();
            db.record_download(&peer.public_key_hex(), Utc::now()).unwrap();
        }
        for i in 0..4 {
            let event = request(&peer, json!({"title": format!("friend request {i}")}));
            if matches!(h.pipeline.handle_request(event).await, RequestOutcome::NoMatch) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 5);
    }

    #[tokio::test]
    async fn duplicate_fingerprints_in_response_persist_once() {
        let h = harness(RequestLimits::default());
        let peer = Identity::generate();
        let event = response(&peer, "unknown-request", &["00000000000000c1", "00000000000000c1"]);

        assert_eq!(
            h.pipeline.handle_response(event.clone()).await,
            ResponseOutcome::Stored {
                books: 1,
                links_removed: 0,
                suppressed: false,
            }
        );
        assert_eq!(
            h.pipeline.handle_response(event.clone()).await,
            ResponseOutcome::Duplicate
        );

        let db = h.db.lock().await;
        assert_eq!(db.response_books(&event.id).unwrap().len(), 1);
        let friend = db.get_friend(&peer.public_key_hex()).unwrap().unwrap();
        assert_eq!(friend.download_count, 0);
    }

    #[tokio::test]
    async fn delivered_fingerprint_prunes_pending_link() {
        let h = harness(RequestLimits::default());
        // Publishing is refused so the request stays pending.
        let pending_relay = MockRelay::new(false);
        let pipeline = Pipeline::new(
            h.db.clone(),
            h.blacklist.clone(),
            Arc::new(client(Some(h.own.clone()), &pending_relay)),
            RequestLimits::default(),
            true,
        );

        let requester = Identity::generate();
        let req = request(&requester, json!({"title": "dune"}));
        let RequestOutcome::Matched { reply, .. } = pipeline.handle_request(req.clone()).await else {
            panic!("expected a match");
        };
        assert_eq!(reply.await.unwrap(), SendOutcome::Failed);

        let other_peer = Identity::generate();
        let outcome = pipeline
            .handle_response(response(&other_peer, &req.id, &["00000000000000a1"]))
            .await;
        assert_eq!(
            outcome,
            ResponseOutcome::Stored {
                books: 1,
                links_removed: 1,
                suppressed: false,
            }
        );
        let db = h.db.lock().await;
        let links = db.links_for_request(&req.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].file_hash, "00000000000000a2");
        assert!(!db.get_request(&req.id).unwrap().sent);
        drop(db);

        let outcome = pipeline
            .handle_response(response(&other_peer, &req.id, &["00000000000000a2"]))
            .await;
        assert_eq!(
            outcome,
            ResponseOutcome::Stored {
                books: 1,
                links_removed: 1,
                suppressed: true,
            }
        );
        assert!(h.db.lock().await.get_request(&req.id).unwrap().sent);
    }

    #[tokio::test]
    async fn blacklisted_fingerprint_drops_whole_response() {
        let h = harness(RequestLimits::default());
        h.blacklist.add("00000000000000c2");
        let peer = Identity::generate();
        let event = response(&peer, "some-request", &["00000000000000c1", "00000000000000c2"]);

        assert_eq!(
            h.pipeline.handle_response(event.clone()).await,
            ResponseOutcome::Blacklisted
        );
        let db = h.db.lock().await;
        assert_eq!(db.response_processed(&event.id).unwrap(), None);
        assert!(db.get_friend(&peer.public_key_hex()).unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_responses_are_dropped() {
        let h = harness(RequestLimits::default());
        let peer = Identity::generate();

        let no_ref = EventBuilder::new(8699, "[]").sign(&peer).unwrap();
        assert_eq!(h.pipeline.handle_response(no_ref).await, ResponseOutcome::Invalid);

        let bad_hash = response(&peer, "r", &["XYZ"]);
        assert_eq!(h.pipeline.handle_response(bad_hash).await, ResponseOutcome::Invalid);

        let unreferenced = {
            let books = json!([{
                "id": 1, "title": "T", "authors": [], "file_type": "fb2",
                "file_hash": "00000000000000c1", "file_size": 1
            }]);
            EventBuilder::new(8699, books.to_string()).sign(&peer).unwrap()
        };
        assert_eq!(
            h.pipeline.handle_response(unreferenced).await,
            ResponseOutcome::NoRequestReference
        );

        let own = response(&h.own, "r", &["00000000000000c1"]);
        assert_eq!(h.pipeline.handle_response(own).await, ResponseOutcome::Own);
    }

    #[tokio::test]
    async fn dispatch_routes_by_kind() {
        let h = harness(RequestLimits::default());
        let peer = Identity::generate();
        let event = request(&peer, json!({"title": "hyperion"}));

        h.pipeline.handle_event("wss://relay.test", event.clone()).await;
        h.pipeline
            .handle_event("wss://relay.test", EventBuilder::new(1, "hi").sign(&peer).unwrap())
            .await;

        assert!(h.db.lock().await.request_exists(&event.id).unwrap());
        assert_eq!(request_count(&h.db).await, 1);
    }
}
