//! # shelfnet-node
//!
//! This binary:
//! - subscribes to every configured relay for book requests and responses,
//!   reconnecting with exponential backoff
//! - answers peers' requests with matches from the local catalog, at most
//!   once per request
//! - records responses to our own requests and credits the peers that sent
//!   them
//! - periodically deletes stale exchange state
//!
//! It can also publish a single request, list the offers received for our
//! own requests, edit the blacklist file or credit a peer for a download,
//! and exit.

use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shelfnet_net::{SubscriptionManager, WsTransport};
use shelfnet_node::cleanup::{self, Retention};
use shelfnet_node::client::load_identity;
use shelfnet_node::inbox;
use shelfnet_node::{Blacklist, Client, NodeConfig, Pipeline, RequestLimits};
use shelfnet_shared::normalize_pubkey;
use shelfnet_store::Database;

/// Decentralized book request exchange node.
#[derive(Parser, Debug)]
#[command(name = "shelfnet-node", version)]
#[command(about = "Book request/response exchange over Nostr relays")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node until Ctrl+C (the default).
    Run,
    /// Publish a book request to the configured relays and exit.
    Request {
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        series: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// 16-character lowercase hex fingerprint.
        #[arg(long)]
        file_hash: Option<String>,
    },
    /// Add a sender key or content fingerprint to the blacklist file.
    Ban { entry: String },
    /// Remove a sender key or content fingerprint from the blacklist file.
    Unban { entry: String },
    /// Credit a peer for a completed download, raising its daily request limit.
    Downloaded { pubkey: String },
    /// List the books peers offered for our newest requests.
    Responses {
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,shelfnet_node=debug,shelfnet_net=debug")
            }),
        )
        .init();

    let args = Args::parse();

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Request {
            author,
            series,
            title,
            file_hash,
        } => {
            let db = Mutex::new(open_database(&config)?);
            let client = build_client(&config)?;
            let event = client
                .request_book(
                    &db,
                    author.as_deref(),
                    series.as_deref(),
                    title.as_deref(),
                    file_hash.as_deref(),
                )
                .await?;
            info!(event = %event.id, "Request published");
            Ok(())
        }
        Command::Ban { entry } => {
            let blacklist = Blacklist::from_file(&config.blacklist_path);
            if !blacklist.add(&entry) {
                anyhow::bail!("not a sender key or content fingerprint: {entry}");
            }
            blacklist.save(&config.blacklist_path)?;
            info!(entries = blacklist.len(), "Blacklist updated");
            Ok(())
        }
        Command::Unban { entry } => {
            let blacklist = Blacklist::from_file(&config.blacklist_path);
            if !blacklist.remove(&entry) {
                warn!(entry = %entry, "Entry was not blacklisted");
            }
            blacklist.save(&config.blacklist_path)?;
            info!(entries = blacklist.len(), "Blacklist updated");
            Ok(())
        }
        Command::Downloaded { pubkey } => {
            let Some(pubkey) = normalize_pubkey(&pubkey) else {
                anyhow::bail!("not a public key: {pubkey}");
            };
            let db = open_database(&config)?;
            db.record_download(&pubkey, Utc::now())?;
            let downloads = db.friend_download_count(&pubkey)?;
            info!(peer = %pubkey, downloads, "Download recorded");
            Ok(())
        }
        Command::Responses { limit } => {
            let Some(identity) = load_identity(&config)? else {
                anyhow::bail!("no secret key configured, so there are no own requests");
            };
            let db = open_database(&config)?;
            let summaries = inbox::own_request_summaries(&db, &identity.public_key_hex(), limit)?;
            for summary in summaries {
                let request = &summary.request;
                info!(
                    request = %request.event_id,
                    title = request.title.as_deref().unwrap_or("-"),
                    author = request.author.as_deref().unwrap_or("-"),
                    offers = summary.offers.len(),
                    "Own request"
                );
                for offer in &summary.offers {
                    info!(
                        from = %offer.responder,
                        title = %offer.book.title,
                        file_hash = %offer.book.file_hash,
                        size = offer.book.file_size,
                        annotation = offer.local_annotation.as_deref().unwrap_or(""),
                        "  offer"
                    );
                }
            }
            Ok(())
        }
    }
}

fn open_database(config: &NodeConfig) -> anyhow::Result<Database> {
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    Ok(db)
}

fn build_client(config: &NodeConfig) -> anyhow::Result<Client<WsTransport>> {
    let identity = load_identity(config)?;
    Ok(Client::new(
        identity,
        Arc::new(WsTransport),
        config.relays.clone(),
        config.publish(),
        config.kinds,
    ))
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    info!("Starting shelfnet node v{}", env!("CARGO_PKG_VERSION"));
    info!(?config, "Loaded configuration");

    if config.relays.is_empty() {
        warn!("No relays configured (SHELFNET_RELAYS); the node will stay idle");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = open_database(&config)?;
    let released = db.release_stale_send_claims()?;
    if released > 0 {
        info!(released, "Released reply claims left by a previous run");
    }
    let db = Arc::new(Mutex::new(db));

    let blacklist = Arc::new(Blacklist::from_file(&config.blacklist_path));

    let client = Arc::new(build_client(&config)?);
    match client.public_key() {
        Some(pubkey) => info!(pubkey = %pubkey, "Publishing enabled"),
        None => info!("No secret key configured, running receive-only"),
    }

    let limits = RequestLimits::new(
        config.daily_limit,
        config.friend_bonus,
        config.max_friend_bonus,
    );
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        blacklist,
        client.clone(),
        limits,
        config.suppress_redundant_replies,
    ));

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retention = Retention {
        own_pubkey: client.public_key(),
        request_ttl: config.request_ttl,
        interval: config.cleanup_interval,
    };
    let cleanup_task = tokio::spawn(cleanup::run_cleanup_loop(
        db.clone(),
        retention,
        shutdown_rx.clone(),
    ));

    let manager = SubscriptionManager::new(Arc::new(WsTransport), pipeline, config.subscription());
    let relay_tasks = manager.spawn(&config.relays, shutdown_rx);
    info!(relays = relay_tasks.len(), "Relay subscriptions running");

    // -----------------------------------------------------------------------
    // 5. Wait for Ctrl+C, then stop every loop
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(true);

    for task in relay_tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Relay task ended abnormally");
        }
    }
    if let Err(e) = cleanup_task.await {
        warn!(error = %e, "Cleanup task ended abnormally");
    }

    for (relay, state) in manager.tracker().snapshot() {
        info!(relay = %relay, %state, "Final relay state");
    }
    info!("Shutdown complete");
    Ok(())
}
