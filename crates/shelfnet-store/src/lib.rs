//! # shelfnet-store
//!
//! Local SQLite storage for a shelfnet node.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the request and
//! response exchange tables, the friend ledger, catalog lookups and
//! retention.

pub mod catalog;
pub mod database;
pub mod friends;
pub mod migrations;
pub mod models;
pub mod requests;
pub mod responses;
pub mod retention;

mod error;

pub use catalog::MAX_MATCHES;
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use retention::CleanupReport;
