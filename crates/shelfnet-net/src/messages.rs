//! NIP-01 frames exchanged with a relay.
//!
//! Every frame is a JSON array whose first element names the message type.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use shelfnet_shared::Event;

use crate::error::{NetError, Result};

/// Subscription filter. Only the fields this node needs are modelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
}

impl Filter {
    pub fn new(kinds: impl IntoIterator<Item = u16>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            since: None,
        }
    }

    pub fn since(mut self, unix_secs: i64) -> Self {
        self.since = Some(unix_secs);
        self
    }

    pub fn matches_kind(&self, kind: u16) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Frames sent by this node.
#[derive(Debug, Clone)]
pub enum ClientMessage<'a> {
    Req {
        subscription_id: &'a str,
        filter: &'a Filter,
    },
    Event(&'a Event),
    Close(&'a str),
}

impl ClientMessage<'_> {
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Req {
                subscription_id,
                filter,
            } => json!(["REQ", subscription_id, filter]),
            Self::Event(event) => json!(["EVENT", event]),
            Self::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

/// Frames received from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Eose(String),
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice(String),
}

impl RelayMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let frame: Vec<Value> = serde_json::from_str(text)?;
        let kind = frame
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| NetError::Protocol("missing message type".into()))?;

        match kind {
            "EVENT" => {
                let event = frame
                    .get(2)
                    .cloned()
                    .ok_or_else(|| NetError::Protocol("EVENT without event".into()))?;
                Ok(Self::Event {
                    subscription_id: string_at(&frame, 1)?,
                    event: serde_json::from_value(event)?,
                })
            }
            "OK" => Ok(Self::Ok {
                event_id: string_at(&frame, 1)?,
                accepted: frame
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| NetError::Protocol("OK without status".into()))?,
                message: optional_string_at(&frame, 3),
            }),
            "EOSE" => Ok(Self::Eose(string_at(&frame, 1)?)),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: string_at(&frame, 1)?,
                message: optional_string_at(&frame, 2),
            }),
            "NOTICE" => Ok(Self::Notice(optional_string_at(&frame, 1))),
            other => Err(NetError::Protocol(other.to_string())),
        }
    }
}

fn string_at(frame: &[Value], idx: usize) -> Result<String> {
    frame
        .get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| NetError::Protocol(format!("expected string at position {idx}")))
}

fn optional_string_at(frame: &[Value], idx: usize) -> String {
    frame
        .get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
