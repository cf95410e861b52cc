//! Signed relay event model.
//!
//! Events follow the NIP-01 layout: the id is the SHA-256 of the compact
//! JSON array `[0, pubkey, created_at, kind, tags, content]` and the
//! signature is a BIP-340 Schnorr signature over that id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{HEX_ID_LEN, REPLY_MARKER};
use crate::error::EventError;
use crate::identity::{verify_signature, Identity};

/// A single tag: name followed by values, e.g. `["e", "<id>", "", "reply"]`.
pub type Tag = Vec<String>;

/// A signed event as exchanged with relays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Author x-only public key (hex).
    pub pubkey: String,
    /// Unix timestamp in seconds, as claimed by the author.
    pub created_at: i64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Hex Schnorr signature over `id`.
    pub sig: String,
}

impl Event {
    /// Recompute the id and check the signature.
    pub fn verify(&self) -> Result<(), EventError> {
        if self.id.len() != HEX_ID_LEN || self.pubkey.len() != HEX_ID_LEN {
            return Err(EventError::Malformed("id or pubkey length"));
        }
        let expected = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if hex::encode(expected) != self.id.to_ascii_lowercase() {
            return Err(EventError::IdMismatch);
        }

        let pubkey = hex::decode(&self.pubkey).map_err(|_| EventError::Malformed("pubkey"))?;
        let sig = hex::decode(&self.sig).map_err(|_| EventError::Malformed("sig"))?;
        verify_signature(&pubkey, &expected, &sig).map_err(|_| EventError::InvalidSignature)
    }

    /// All values of the first position of tags named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// The event this one replies to: the `e` tag marked `reply`, falling
    /// back to the first `e` tag.
    pub fn reply_reference(&self) -> Option<&str> {
        let marked = self.tags.iter().find(|tag| {
            tag.first().map(String::as_str) == Some("e")
                && tag.get(3).map(String::as_str) == Some(REPLY_MARKER)
        });
        match marked.and_then(|tag| tag.get(1)) {
            Some(id) => Some(id.as_str()),
            None => self.tag_values("e").next(),
        }
    }

    /// Short id prefix for log lines.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Builder for an event that has not been signed yet.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: u16,
    content: String,
    tags: Vec<Tag>,
    created_at: Option<i64>,
}

impl EventBuilder {
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags: Vec::new(),
            created_at: None,
        }
    }

    pub fn tag<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(values.into_iter().map(Into::into).collect());
        self
    }

    /// Override the timestamp (defaults to now).
    pub fn created_at(mut self, ts: i64) -> Self {
        self.created_at = Some(ts);
        self
    }

    pub fn sign(self, identity: &Identity) -> Result<Event, EventError> {
        let pubkey = identity.public_key_hex();
        let created_at = self.created_at.unwrap_or_else(|| Utc::now().timestamp());
        let id = compute_id(&pubkey, created_at, self.kind, &self.tags, &self.content)?;
        let sig = identity
            .sign_id(&id)
            .map_err(|_| EventError::InvalidSignature)?;

        Ok(Event {
            id: hex::encode(id),
            pubkey,
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: hex::encode(sig),
        })
    }
}

fn compute_id(
    pubkey: &str,
    created_at: i64,
    kind: u16,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32], EventError> {
    let canonical = serde_json::to_string(&(0u8, pubkey, created_at, kind, tags, content))?;
    Ok(Sha256::digest(canonical.as_bytes()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_event_verifies() {
        let id = Identity::generate();
        let event = EventBuilder::new(8698, "{\"title\":\"Dune\"}")
            .tag(["t", "books"])
            .sign(&id)
            .unwrap();

        assert_eq!(event.pubkey, id.public_key_hex());
        assert!(event.verify().is_ok());
    }

    #[test]
    fn test_tampered_content_rejected() {
        let id = Identity::generate();
        let mut event = EventBuilder::new(8698, "original").sign(&id).unwrap();
        event.content = "tampered".to_string();
        assert!(matches!(event.verify(), Err(EventError::IdMismatch)));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut event = EventBuilder::new(1, "hi").sign(&alice).unwrap();
        let forged = EventBuilder::new(1, "hi")
            .created_at(event.created_at)
            .sign(&bob)
            .unwrap();
        event.sig = forged.sig;
        assert!(matches!(event.verify(), Err(EventError::InvalidSignature)));
    }

    #[test]
    fn test_reply_reference_prefers_marker() {
        let id = Identity::generate();
        let event = EventBuilder::new(8699, "[]")
            .tag(["e", "root", "", "root"])
            .tag(["e", "target", "", "reply"])
            .sign(&id)
            .unwrap();
        assert_eq!(event.reply_reference(), Some("target"));

        let plain = EventBuilder::new(8699, "[]")
            .tag(["p", "someone"])
            .tag(["e", "first"])
            .tag(["e", "second"])
            .sign(&id)
            .unwrap();
        assert_eq!(plain.reply_reference(), Some("first"));
    }

    #[test]
    fn test_event_json_shape() {
        let id = Identity::generate();
        let event = EventBuilder::new(8698, "x").created_at(1_700_000_000).sign(&id).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], 8698);
        assert_eq!(json["created_at"], 1_700_000_000);
        assert!(json["tags"].as_array().unwrap().is_empty());
    }
}
