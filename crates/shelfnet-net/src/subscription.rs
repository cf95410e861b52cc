//! Per-relay subscription loops.
//!
//! Each relay gets its own task running connect, subscribe and receive with
//! exponential backoff before every reconnect. The backoff only resets after
//! a session actually delivered something, so a relay that accepts the
//! socket and then closes it right away is retried at the same growing
//! pace as one that refuses connections. All verified events go to
//! one [`EventHandler`]. A shared `watch` channel stops every loop; it is
//! observed while connecting, while backing off and while waiting for the
//! next frame.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shelfnet_shared::{ConnectionState, Event};

use crate::backoff::Backoff;
use crate::messages::{Filter, RelayMessage};
use crate::tracker::RelayTracker;
use crate::transport::{RelaySession, RelayTransport};

/// Receives every verified event from every relay.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, relay: &str, event: Event);
}

/// Settings shared by all relay loops.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub kinds: Vec<u16>,
    /// How far back the subscription filter reaches on every (re)connect.
    pub lookback: Duration,
    pub connect_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            lookback: Duration::from_secs(6 * 3600),
            connect_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

/// How a single session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Ended before the relay sent any event or `EOSE`.
    Dropped,
    /// Ended after the relay delivered at least one event or `EOSE`.
    Disconnected,
    Stopped,
}

/// Launches and supervises one loop per relay.
pub struct SubscriptionManager<T, H> {
    transport: Arc<T>,
    handler: Arc<H>,
    config: SubscriptionConfig,
    tracker: RelayTracker,
}

impl<T: RelayTransport, H: EventHandler> SubscriptionManager<T, H> {
    pub fn new(transport: Arc<T>, handler: Arc<H>, config: SubscriptionConfig) -> Self {
        Self {
            transport,
            handler,
            config,
            tracker: RelayTracker::new(),
        }
    }

    pub fn tracker(&self) -> RelayTracker {
        self.tracker.clone()
    }

    /// Spawn one loop per relay URL.
    pub fn spawn(&self, relays: &[String], shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        relays
            .iter()
            .map(|url| {
                let relay = RelayLoop {
                    url: url.clone(),
                    transport: self.transport.clone(),
                    handler: self.handler.clone(),
                    config: self.config.clone(),
                    tracker: self.tracker.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(relay.run())
            })
            .collect()
    }

    /// Spawn every loop and wait until all of them have stopped.
    pub async fn run(&self, relays: &[String], shutdown: watch::Receiver<bool>) {
        info!(relays = relays.len(), "starting relay subscriptions");
        for handle in self.spawn(relays, shutdown) {
            if let Err(e) = handle.await {
                warn!(error = %e, "relay task panicked");
            }
        }
        info!("all relay subscriptions stopped");
    }
}

struct RelayLoop<T, H> {
    url: String,
    transport: Arc<T>,
    handler: Arc<H>,
    config: SubscriptionConfig,
    tracker: RelayTracker,
    shutdown: watch::Receiver<bool>,
}

impl<T: RelayTransport, H: EventHandler> RelayLoop<T, H> {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);

        while !*self.shutdown.borrow() {
            self.tracker.set(&self.url, ConnectionState::Connecting);

            let attempt = tokio::time::timeout(
                self.config.connect_timeout,
                self.transport.connect(&self.url),
            );
            let connected = tokio::select! {
                res = attempt => res,
                _ = self.shutdown.changed() => break,
            };

            match connected {
                Ok(Ok(mut session)) => {
                    info!(relay = %self.url, "connected to relay");
                    let end = self.receive(&mut session).await;
                    session.close().await;
                    match end {
                        SessionEnd::Stopped => break,
                        SessionEnd::Disconnected => backoff.reset(),
                        SessionEnd::Dropped => {
                            warn!(relay = %self.url, "relay session ended before delivering anything")
                        }
                    }
                }
                Ok(Err(e)) => warn!(relay = %self.url, error = %e, "relay connect failed"),
                Err(_) => warn!(relay = %self.url, "relay connect timed out"),
            }
            self.tracker.set(&self.url, ConnectionState::Disconnected);

            let delay = backoff.next_delay();
            debug!(relay = %self.url, delay_secs = delay.as_secs(), "backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.tracker.set(&self.url, ConnectionState::Stopped);
        info!(relay = %self.url, "relay loop stopped");
    }

    async fn receive(&mut self, session: &mut T::Session) -> SessionEnd {
        let subscription_id = uuid::Uuid::new_v4().simple().to_string();
        let filter = Filter::new(self.config.kinds.iter().copied()).since(self.since());

        if let Err(e) = session.subscribe(&subscription_id, &filter).await {
            warn!(relay = %self.url, error = %e, "subscribe failed");
            return SessionEnd::Dropped;
        }
        self.tracker.set(&self.url, ConnectionState::Subscribed);

        let mut delivered = false;
        let ended = |delivered: bool| {
            if delivered {
                SessionEnd::Disconnected
            } else {
                SessionEnd::Dropped
            }
        };
        loop {
            let next = tokio::select! {
                msg = session.next_message() => msg,
                _ = self.shutdown.changed() => return SessionEnd::Stopped,
            };

            match next {
                Ok(Some(RelayMessage::Event { event, .. })) => {
                    delivered = true;
                    self.tracker.set(&self.url, ConnectionState::Receiving);
                    if !filter.matches_kind(event.kind) {
                        debug!(relay = %self.url, kind = event.kind, "ignoring unexpected kind");
                        continue;
                    }
                    if let Err(e) = event.verify() {
                        debug!(relay = %self.url, event = %event.short_id(), error = %e, "dropping unverifiable event");
                        continue;
                    }
                    self.handler.handle_event(&self.url, event).await;
                }
                Ok(Some(RelayMessage::Eose(_))) => {
                    delivered = true;
                    debug!(relay = %self.url, "stored events delivered");
                    self.tracker.set(&self.url, ConnectionState::Receiving);
                }
                Ok(Some(RelayMessage::Closed { message, .. })) => {
                    warn!(relay = %self.url, reason = %message, "subscription closed by relay");
                    return ended(delivered);
                }
                Ok(Some(RelayMessage::Notice(message))) => {
                    debug!(relay = %self.url, notice = %message, "relay notice");
                }
                Ok(Some(RelayMessage::Ok { .. })) => {}
                Ok(None) => {
                    info!(relay = %self.url, "relay stream ended");
                    return ended(delivered);
                }
                Err(e) => {
                    warn!(relay = %self.url, error = %e, "relay receive failed");
                    return ended(delivered);
                }
            }
        }
    }

    fn since(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        now.saturating_sub(self.config.lookback).as_secs() as i64
    }
}
