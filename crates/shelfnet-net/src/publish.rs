//! Fan-out publishing of a signed event.
//!
//! Every relay gets its own connection attempt with independent timeouts;
//! one relay failing never affects the others.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use shelfnet_shared::Event;

use crate::error::{NetError, Result};
use crate::messages::RelayMessage;
use crate::transport::{RelaySession, RelayTransport};

#[derive(Debug, Clone, Copy)]
pub struct PublishConfig {
    pub connect_timeout: Duration,
    /// Bound on sending the event and waiting for the relay's `OK`.
    pub publish_timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// Publish to a single relay and wait for its acceptance.
pub async fn publish_to_relay<T: RelayTransport>(
    transport: &T,
    url: &str,
    event: &Event,
    config: PublishConfig,
) -> Result<()> {
    let mut session = tokio::time::timeout(config.connect_timeout, transport.connect(url))
        .await
        .map_err(|_| NetError::Timeout("connect"))??;

    let outcome = tokio::time::timeout(config.publish_timeout, send_and_confirm(&mut session, event))
        .await
        .map_err(|_| NetError::Timeout("publish"))
        .and_then(|res| res);

    session.close().await;
    outcome
}

/// Publish to every relay concurrently. Returns how many accepted the event.
pub async fn publish_to_relays<T: RelayTransport>(
    transport: &T,
    relays: &[String],
    event: &Event,
    config: PublishConfig,
) -> usize {
    let attempts = relays.iter().map(|url| async move {
        match publish_to_relay(transport, url, event, config).await {
            Ok(()) => {
                debug!(relay = %url, event = %event.short_id(), "event accepted");
                true
            }
            Err(e) => {
                warn!(relay = %url, event = %event.short_id(), error = %e, "publish failed");
                false
            }
        }
    });

    join_all(attempts).await.into_iter().filter(|ok| *ok).count()
}

async fn send_and_confirm<S: RelaySession>(session: &mut S, event: &Event) -> Result<()> {
    session.send_event(event).await?;
    loop {
        match session.next_message().await? {
            Some(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            }) if event_id == event.id => {
                return if accepted {
                    Ok(())
                } else {
                    Err(NetError::Rejected(message))
                };
            }
            Some(_) => continue,
            None => return Err(NetError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use shelfnet_shared::{EventBuilder, Identity};

    use super::*;
    use crate::messages::Filter;
    use crate::transport::mock::MockTransport;

    fn event() -> Event {
        EventBuilder::new(8698, "{}")
            .sign(&Identity::generate())
            .unwrap()
    }

    #[tokio::test]
    async fn counts_acceptances() {
        let transport = MockTransport::accepting(true);
        let relays = vec!["wss://a".to_string(), "wss://b".to_string()];
        let accepted = publish_to_relays(&transport, &relays, &event(), PublishConfig::default()).await;
        assert_eq!(accepted, 2);
        assert_eq!(transport.state.lock().unwrap().published.len(), 2);
    }

    #[tokio::test]
    async fn rejection_is_not_success() {
        let transport = MockTransport::accepting(false);
        let err = publish_to_relay(&transport, "wss://a", &event(), PublishConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Rejected(_)));
    }

    /// Relay that accepts the connection but never answers.
    struct Silent;
    struct SilentSession;

    #[async_trait]
    impl RelayTransport for Silent {
        type Session = SilentSession;
        async fn connect(&self, url: &str) -> Result<SilentSession> {
            if url.contains("down") {
                return Err(NetError::Closed);
            }
            Ok(SilentSession)
        }
    }

    #[async_trait]
    impl RelaySession for SilentSession {
        async fn subscribe(&mut self, _: &str, _: &Filter) -> Result<()> {
            Ok(())
        }
        async fn send_event(&mut self, _: &Event) -> Result<()> {
            Ok(())
        }
        async fn next_message(&mut self) -> Result<Option<RelayMessage>> {
            std::future::pending().await
        }
        async fn close(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated() {
        let transport = Arc::new(Silent);
        let relays = vec!["wss://down".to_string(), "wss://silent".to_string()];
        let config = PublishConfig {
            connect_timeout: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(2),
        };

        let err = publish_to_relay(transport.as_ref(), "wss://silent", &event(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Timeout("publish")));
        assert_eq!(
            publish_to_relays(transport.as_ref(), &relays, &event(), config).await,
            0
        );
    }
}
