//! Onchain Transaction Poller Job
//!
//! Drives every non-terminal onchain transaction through its state machine
//! on a fixed cadence. Polls triggered by commit hooks share the same
//! single-flight lock, so ticks never overlap with them.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use crate::services::onchain_transactions::OnchainTransactionManager;

/// Start the onchain transaction poller
///
/// # Arguments
///
/// * `manager` - Transaction manager shared with the request path
/// * `poll_interval` - Time between polls (`TX_POLL_INTERVAL_SECS`)
pub async fn start_onchain_transaction_poller(
    manager: Arc<OnchainTransactionManager>,
    poll_interval: Duration,
) {
    tokio::spawn(async move {
        info!(
            poll_interval_secs = poll_interval.as_secs(),
            "Onchain transaction poller started"
        );

        let mut interval = interval(poll_interval);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping onchain transaction poller");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = manager.poll().await {
                        error!(error = %e, "Onchain transaction poll failed");
                    }
                }
            }
        }

        info!("Onchain transaction poller stopped");
    });
}
