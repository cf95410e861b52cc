//! Banned senders and banned content.
//!
//! Backed by a flat text file: one entry per line, blank lines and `#`
//! comments ignored. A 16-character line is a content fingerprint; a 64-char
//! x-only or 66-char compressed hex key is a sender. Sender keys are stored
//! in x-only form, so either encoding matches the same peer.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use shelfnet_shared::constants::FILE_HASH_LEN;
use shelfnet_shared::normalize_pubkey;
use shelfnet_shared::protocol::is_valid_file_hash;

use crate::error::Result;

/// One parsed blacklist line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlacklistEntry {
    Sender(String),
    Content(String),
}

impl BlacklistEntry {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() == FILE_HASH_LEN {
            let hash = raw.to_ascii_lowercase();
            return is_valid_file_hash(&hash).then_some(Self::Content(hash));
        }
        normalize_pubkey(raw).map(Self::Sender)
    }
}

#[derive(Debug, Default)]
struct Sets {
    senders: HashSet<String>,
    content: HashSet<String>,
}

/// Thread-safe blacklist. Lookups take a shared lock, mutations an
/// exclusive one.
#[derive(Debug, Default)]
pub struct Blacklist {
    sets: RwLock<Sets>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a blacklist from `path`. A missing file yields an empty list.
    pub fn from_file(path: &Path) -> Self {
        let blacklist = Self::new();
        blacklist.load(path);
        blacklist
    }

    pub fn is_sender_blocked(&self, sender: &str) -> bool {
        match normalize_pubkey(sender) {
            Some(key) => self.read().senders.contains(&key),
            None => false,
        }
    }

    pub fn is_content_blocked(&self, fingerprint: &str) -> bool {
        self.read()
            .content
            .contains(&fingerprint.trim().to_ascii_lowercase())
    }

    /// Add a sender key or content fingerprint. Returns `false` if the value
    /// is not a valid entry.
    pub fn add(&self, raw: &str) -> bool {
        let Some(entry) = BlacklistEntry::parse(raw) else {
            return false;
        };
        let mut sets = self.write();
        match entry {
            BlacklistEntry::Sender(key) => sets.senders.insert(key),
            BlacklistEntry::Content(hash) => sets.content.insert(hash),
        };
        true
    }

    /// Returns `true` if the entry was present.
    pub fn remove(&self, raw: &str) -> bool {
        let Some(entry) = BlacklistEntry::parse(raw) else {
            return false;
        };
        let mut sets = self.write();
        match entry {
            BlacklistEntry::Sender(key) => sets.senders.remove(&key),
            BlacklistEntry::Content(hash) => sets.content.remove(&hash),
        }
    }

    pub fn len(&self) -> usize {
        let sets = self.read();
        sets.senders.len() + sets.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the in-memory sets with the contents of `path`.
    pub fn load(&self, path: &Path) {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No blacklist file, starting empty");
                String::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read blacklist file");
                String::new()
            }
        };

        let mut fresh = Sets::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match BlacklistEntry::parse(line) {
                Some(BlacklistEntry::Sender(key)) => {
                    fresh.senders.insert(key);
                }
                Some(BlacklistEntry::Content(hash)) => {
                    fresh.content.insert(hash);
                }
                None => warn!(line = lineno + 1, value = %line, "Skipping invalid blacklist entry"),
            }
        }

        info!(
            path = %path.display(),
            senders = fresh.senders.len(),
            fingerprints = fresh.content.len(),
            "Loaded blacklist"
        );
        *self.write() = fresh;
    }

    /// Write every entry to `path`, senders first, each group sorted.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::from("# shelfnet blacklist\n");
        {
            let sets = self.read();
            let mut senders: Vec<_> = sets.senders.iter().collect();
            let mut content: Vec<_> = sets.content.iter().collect();
            senders.sort();
            content.sort();
            for entry in senders.into_iter().chain(content) {
                let _ = writeln!(out, "{entry}");
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Sets> {
        self.sets.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Sets> {
        self.sets.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
