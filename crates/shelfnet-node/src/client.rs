//! Signing identity and outbound publishing.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use shelfnet_net::{publish_to_relays, PublishConfig, RelayTransport};
use shelfnet_shared::constants::REPLY_MARKER;
use shelfnet_shared::{Event, EventBuilder, EventKinds, Identity, RequestPayload};
use shelfnet_store::{Database, NewRequest};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};

/// Load the node identity from the configured hex key or key file.
/// `None` means the node runs receive-only.
pub fn load_identity(config: &NodeConfig) -> Result<Option<Identity>> {
    if let Some(secret) = &config.secret_key {
        return Ok(Some(Identity::from_secret_hex(secret)?));
    }
    if let Some(path) = &config.key_file {
        let secret = std::fs::read_to_string(path)?;
        return Ok(Some(Identity::from_secret_hex(secret.trim())?));
    }
    Ok(None)
}

/// Holds the identity and the relay set every outbound event goes to.
pub struct Client<T> {
    identity: Option<Identity>,
    transport: Arc<T>,
    relays: Vec<String>,
    publish: PublishConfig,
    kinds: EventKinds,
}

impl<T: RelayTransport> Client<T> {
    pub fn new(
        identity: Option<Identity>,
        transport: Arc<T>,
        relays: Vec<String>,
        publish: PublishConfig,
        kinds: EventKinds,
    ) -> Self {
        Self {
            identity,
            transport,
            relays,
            publish,
            kinds,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.identity.is_some()
    }

    /// Own x-only public key in hex.
    pub fn public_key(&self) -> Option<String> {
        self.identity.as_ref().map(Identity::public_key_hex)
    }

    pub fn kinds(&self) -> EventKinds {
        self.kinds
    }

    fn identity(&self) -> Result<&Identity> {
        self.identity.as_ref().ok_or(NodeError::PublishingDisabled)
    }

    /// Validate the search terms and sign a request event.
    pub fn build_and_sign_request(
        &self,
        author: Option<&str>,
        series: Option<&str>,
        title: Option<&str>,
        file_hash: Option<&str>,
    ) -> Result<Event> {
        let payload = RequestPayload::new(author, series, title, file_hash);
        payload.validate()?;

        let event = EventBuilder::new(self.kinds.request, payload.to_json()?).sign(self.identity()?)?;
        Ok(event)
    }

    /// Sign a response to `request_id`, addressed to `requester`.
    pub fn build_and_sign_response(
        &self,
        request_id: &str,
        requester: &str,
        content: String,
    ) -> Result<Event> {
        let event = EventBuilder::new(self.kinds.response, content)
            .tag(["e", request_id, "", REPLY_MARKER])
            .tag(["p", requester])
            .sign(self.identity()?)?;
        Ok(event)
    }

    /// Publish to every configured relay. Returns the number of relays that
    /// accepted the event; zero is reported as an error.
    pub async fn publish(&self, event: &Event) -> Result<usize> {
        let accepted = publish_to_relays(self.transport.as_ref(), &self.relays, event, self.publish).await;
        if accepted == 0 {
            warn!(event = %event.short_id(), relays = self.relays.len(), "No relay accepted event");
            return Err(NodeError::NoRelayAccepted(event.id.clone()));
        }
        info!(event = %event.short_id(), accepted, relays = self.relays.len(), "Event published");
        Ok(accepted)
    }

    /// Ask the network for a book and remember the request as our own, so
    /// responses to it survive retention.
    pub async fn request_book(
        &self,
        db: &Mutex<Database>,
        author: Option<&str>,
        series: Option<&str>,
        title: Option<&str>,
        file_hash: Option<&str>,
    ) -> Result<Event> {
        let event = self.build_and_sign_request(author, series, title, file_hash)?;
        self.publish(&event).await?;

        let payload = RequestPayload::from_json(&event.content)?;
        let own = NewRequest {
            event_id: event.id.clone(),
            sender_pubkey: event.pubkey.clone(),
            author: payload.author,
            series: payload.series,
            title: payload.title,
            file_hash: payload.file_hash,
            created_at: event.created_at,
        };
        db.lock().await.insert_own_request(&own, Utc::now())?;

        Ok(event)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use shelfnet_net::{Filter, NetError, RelayMessage, RelaySession};
    use shelfnet_shared::ValidationError;

    use super::*;

    /// In-memory relay set: records published events and acknowledges them
    /// with a fixed status.
    #[derive(Clone)]
    pub(crate) struct MockRelay {
        pub(crate) published: Arc<StdMutex<Vec<Event>>>,
        pub(crate) accept: Arc<AtomicBool>,
    }

    impl MockRelay {
        pub(crate) fn new(accept: bool) -> Self {
            Self {
                published: Arc::new(StdMutex::new(Vec::new())),
                accept: Arc::new(AtomicBool::new(accept)),
            }
        }

        pub(crate) fn set_accepting(&self, accept: bool) {
            self.accept.store(accept, Ordering::SeqCst);
        }

        pub(crate) fn published(&self) -> Vec<Event> {
            self.published.lock().unwrap().clone()
        }
    }

    pub(crate) struct MockSession {
        relay: MockRelay,
        ack: Option<RelayMessage>,
    }

    #[async_trait]
    impl RelayTransport for MockRelay {
        type Session = MockSession;

        async fn connect(&self, _url: &str) -> std::result::Result<MockSession, NetError> {
            Ok(MockSession {
                relay: self.clone(),
                ack: None,
            })
        }
    }

    #[async_trait]
    impl RelaySession for MockSession {
        async fn subscribe(&mut self, _: &str, _: &Filter) -> std::result::Result<(), NetError> {
            Ok(())
        }

        async fn send_event(&mut self, event: &Event) -> std::result::Result<(), NetError> {
            self.relay.published.lock().unwrap().push(event.clone());
            self.ack = Some(RelayMessage::Ok {
                event_id: event.id.clone(),
                accepted: self.relay.accept.load(Ordering::SeqCst),
                message: String::new(),
            });
            Ok(())
        }

        async fn next_message(&mut self) -> std::result::Result<Option<RelayMessage>, NetError> {
            Ok(self.ack.take())
        }

        async fn close(&mut self) {}
    }

    pub(crate) fn client(identity: Option<Identity>, relay: &MockRelay) -> Client<MockRelay> {
        Client::new(
            identity,
            Arc::new(relay.clone()),
            vec!["wss://one.test".to_string(), "wss://two.test".to_string()],
            PublishConfig::default(),
            EventKinds::default(),
        )
    }

    #[test]
    fn disabled_without_identity() {
        let relay = MockRelay::new(true);
        let client = client(None, &relay);
        assert!(!client.is_enabled());
        assert_eq!(client.public_key(), None);
        assert!(matches!(
            client.build_and_sign_request(None, None, Some("Dune"), None),
            Err(NodeError::PublishingDisabled)
        ));
    }

    #[test]
    fn request_validation() {
        let relay = MockRelay::new(true);
        let client = client(Some(Identity::generate()), &relay);

        assert!(matches!(
            client.build_and_sign_request(None, None, None, None),
            Err(NodeError::Validation(ValidationError::Empty))
        ));
        assert!(matches!(
            client.build_and_sign_request(None, Some("abc"), None, None),
            Err(NodeError::Validation(ValidationError::TooShort { .. }))
        ));
        assert!(matches!(
            client.build_and_sign_request(None, None, None, Some("ABCDEF0123456789")),
            Err(NodeError::Validation(ValidationError::BadFileHash))
        ));

        let event = client
            .build_and_sign_request(Some("Herbert"), None, Some("Dune"), None)
            .unwrap();
        assert_eq!(event.kind, 8698);
        assert!(event.verify().is_ok());
        assert_eq!(Some(event.pubkey.clone()), client.public_key());
    }

    #[test]
    fn response_tags() {
        let relay = MockRelay::new(true);
        let client = client(Some(Identity::generate()), &relay);
        let event = client
            .build_and_sign_response("req-id", "requester", "[]".to_string())
            .unwrap();
        assert_eq!(event.kind, 8699);
        assert_eq!(event.reply_reference(), Some("req-id"));
        assert_eq!(event.tag_values("p").collect::<Vec<_>>(), vec!["requester"]);
    }

    #[tokio::test]
    async fn request_book_records_own_request() {
        let relay = MockRelay::new(true);
        let client = client(Some(Identity::generate()), &relay);
        let db = Mutex::new(Database::open_in_memory().unwrap());

        let event = client
            .request_book(&db, None, None, Some("Dune"), None)
            .await
            .unwrap();
        assert_eq!(relay.published().len(), 2);

        let db = db.lock().await;
        let stored = db.get_request(&event.id).unwrap();
        assert!(stored.processed && stored.sent);
        assert_eq!(stored.title.as_deref(), Some("Dune"));
    }

    #[tokio::test]
    async fn zero_acceptances_is_an_error() {
        let relay = MockRelay::new(false);
        let client = client(Some(Identity::generate()), &relay);
        let db = Mutex::new(Database::open_in_memory().unwrap());

        let err = client
            .request_book(&db, None, None, Some("Dune"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::NoRelayAccepted(_)));
        assert!(db
            .lock()
            .await
            .latest_sent_own_request(&client.public_key().unwrap())
            .unwrap()
            .is_none());
    }
}
