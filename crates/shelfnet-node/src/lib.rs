//! # shelfnet-node
//!
//! Book exchange node for Nostr-style relay networks: answers peers' book
//! requests from the local catalog, collects answers to our own requests,
//! and keeps abuse in check with a blacklist and per-sender daily limits.

pub mod blacklist;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod error;
pub mod inbox;
pub mod pipeline;
pub mod rate_limit;
pub mod sender;

pub use blacklist::{Blacklist, BlacklistEntry};
pub use client::Client;
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use pipeline::{Pipeline, RequestOutcome, ResponseOutcome};
pub use rate_limit::RequestLimits;
pub use sender::{ResponseSender, SendOutcome};
