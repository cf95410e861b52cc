use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use shelfnet_store::{CleanupReport, Database};

/// Settings for the periodic retention pass.
#[derive(Debug, Clone)]
pub struct Retention {
    pub own_pubkey: Option<String>,
    pub request_ttl: chrono::Duration,
    pub interval: Duration,
}

/// Run one retention pass now.
pub async fn run_once(db: &Mutex<Database>, retention: &Retention) -> Option<CleanupReport> {
    let cutoff = Utc::now() - retention.request_ttl;
    match db
        .lock()
        .await
        .run_cleanup(retention.own_pubkey.as_deref(), cutoff)
    {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "Cleanup pass failed");
            None
        }
    }
}

/// Run retention every `interval` until shutdown. The first pass runs
/// immediately.
pub async fn run_cleanup_loop(
    db: Arc<Mutex<Database>>,
    retention: Retention,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = retention.interval.as_secs(),
        ttl_days = retention.request_ttl.num_days(),
        "Cleanup loop started"
    );

    let mut ticker = tokio::time::interval(retention.interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if let Some(report) = run_once(&db, &retention).await {
            if report != CleanupReport::default() {
                info!(
                    requests = report.requests,
                    responses = report.responses,
                    "Removed stale exchange state"
                );
            }
        }
    }

    info!("Cleanup loop stopped");
}
