//! Relay transport abstraction and its WebSocket implementation.
//!
//! The subscription manager and the publisher only see the two traits
//! below, so tests can drive them with an in-memory relay.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use shelfnet_shared::Event;

use crate::error::{NetError, Result};
use crate::messages::{ClientMessage, Filter, RelayMessage};

/// Opens sessions to relays by URL.
#[async_trait]
pub trait RelayTransport: Send + Sync + 'static {
    type Session: RelaySession;

    async fn connect(&self, url: &str) -> Result<Self::Session>;
}

/// One open connection to a relay.
#[async_trait]
pub trait RelaySession: Send + 'static {
    /// Send a `REQ` for `filter` under `subscription_id`.
    async fn subscribe(&mut self, subscription_id: &str, filter: &Filter) -> Result<()>;

    /// Send an `EVENT` frame. The relay's `OK` arrives via [`next_message`].
    ///
    /// [`next_message`]: RelaySession::next_message
    async fn send_event(&mut self, event: &Event) -> Result<()>;

    /// Next frame from the relay, `None` once the stream has ended.
    async fn next_message(&mut self) -> Result<Option<RelayMessage>>;

    /// Close the connection, best effort.
    async fn close(&mut self);
}

/// [`RelayTransport`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

pub struct WsSession {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    subscriptions: Vec<String>,
}

#[async_trait]
impl RelayTransport for WsTransport {
    type Session = WsSession;

    async fn connect(&self, url: &str) -> Result<WsSession> {
        let (stream, _) = connect_async(url).await?;
        debug!(relay = %url, "WebSocket connected");
        Ok(WsSession {
            url: url.to_string(),
            stream,
            subscriptions: Vec::new(),
        })
    }
}

impl WsSession {
    async fn send_frame(&mut self, frame: ClientMessage<'_>) -> Result<()> {
        let text = frame.to_json()?;
        trace!(relay = %self.url, frame = %text, "sending frame");
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

#[async_trait]
impl RelaySession for WsSession {
    async fn subscribe(&mut self, subscription_id: &str, filter: &Filter) -> Result<()> {
        self.send_frame(ClientMessage::Req {
            subscription_id,
            filter,
        })
        .await?;
        self.subscriptions.push(subscription_id.to_string());
        Ok(())
    }

    async fn send_event(&mut self, event: &Event) -> Result<()> {
        self.send_frame(ClientMessage::Event(event)).await
    }

    async fn next_message(&mut self) -> Result<Option<RelayMessage>> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => match RelayMessage::parse(text.as_str()) {
                    Ok(parsed) => return Ok(Some(parsed)),
                    Err(e) => debug!(relay = %self.url, error = %e, "ignoring relay frame"),
                },
                Message::Ping(data) => self.stream.send(Message::Pong(data)).await?,
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        for subscription_id in std::mem::take(&mut self.subscriptions) {
            let _ = self.send_frame(ClientMessage::Close(&subscription_id)).await;
        }
        if let Err(e) = self.stream.close(None).await {
            trace!(relay = %self.url, error = %e, "close handshake failed");
        }
    }
}
