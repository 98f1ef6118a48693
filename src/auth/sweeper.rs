//! Expiry sweeper
//!
//! Background loop that evicts sessions whose lease elapsed. Runs for the
//! lifetime of the process, concurrent with live admission traffic; a tick
//! that finds nothing is silent, a tick that fails is logged and the loop
//! keeps going.

use crate::auth::sessions::SessionLedger;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn the sweep loop. The returned handle is aborted at shutdown.
pub fn spawn_sweeper(ledger: Arc<SessionLedger>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run_sweeper(ledger, interval))
}

/// The sweep loop itself. Separated from `spawn_sweeper` so tests can drive
/// it directly.
pub async fn run_sweeper(ledger: Arc<SessionLedger>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so a fresh start does not
    // race process bootstrap.
    ticker.tick().await;

    info!(interval = ?interval, "expiry sweeper started");

    loop {
        ticker.tick().await;

        let removed = ledger.sweep_expired(Utc::now());
        if removed > 0 {
            info!(removed, "swept expired sessions");
        } else {
            debug!("sweep found nothing to remove");
        }
    }
}
