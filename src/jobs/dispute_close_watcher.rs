//! Dispute Close Watcher Job
//!
//! Every few minutes, submits `emptyChannel` for disputes whose on-chain
//! challenge period has elapsed.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::services::disputes::DisputesService;

/// Start the dispute close watcher
///
/// # Arguments
///
/// * `disputes` - Dispute service
/// * `poll_interval` - Time between checks (`DISPUTE_POLL_INTERVAL_SECS`, default 3 minutes)
pub async fn start_dispute_close_watcher(disputes: Arc<DisputesService>, poll_interval: Duration) {
    tokio::spawn(async move {
        info!(
            poll_interval_secs = poll_interval.as_secs(),
            "Dispute close watcher started"
        );

        let mut interval = interval(poll_interval);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping dispute close watcher");
                    break;
                }
                _ = interval.tick() => {
                    match disputes.close_expired_disputes().await {
                        Ok(0) => debug!("No disputes ready to close"),
                        Ok(submitted) => info!(submitted = submitted, "Submitted emptyChannel transactions"),
                        Err(e) => error!(error = %e, "Dispute close check failed"),
                    }
                }
            }
        }

        info!("Dispute close watcher stopped");
    });
}
