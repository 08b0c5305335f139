//! Collateral Sync Job
//!
//! Periodically re-checks hub collateral for recently active open channels
//! and proposes a top-up where it fell below the policy minimum.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::error::HubError;
use crate::ledger::Ledger;
use crate::services::channel_ledger;
use crate::services::channels::ChannelsService;

/// Start the collateral sync job
///
/// # Arguments
///
/// * `ledger` - Ledger to read channels from
/// * `channels` - Channel service that issues proposals
/// * `poll_interval` - Time between checks (`COLLATERAL_POLL_INTERVAL_SECS`)
/// * `active_window` - Only channels updated within this window are checked
pub async fn start_collateral_sync_job(
    ledger: Ledger,
    channels: Arc<ChannelsService>,
    poll_interval: Duration,
    active_window: Duration,
) {
    tokio::spawn(async move {
        info!(
            poll_interval_secs = poll_interval.as_secs(),
            active_window_secs = active_window.as_secs(),
            "Collateral sync job started"
        );

        let mut interval = interval(poll_interval);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping collateral sync job");
                    break;
                }
                _ = interval.tick() => {
                    match sync_collateral(&ledger, &channels, active_window).await {
                        Ok(proposed) => info!(proposed = proposed, "Collateral sync complete"),
                        Err(e) => error!(error = %e, "Collateral sync failed"),
                    }
                }
            }
        }

        info!("Collateral sync job stopped");
    });
}

/// Returns the number of channels a top-up was proposed for
pub async fn sync_collateral(
    ledger: &Ledger,
    channels: &ChannelsService,
    active_window: Duration,
) -> Result<usize, HubError> {
    let window = chrono::Duration::from_std(active_window)
        .map_err(|e| HubError::Config(format!("Invalid collateral window: {}", e)))?;
    let active = channel_ledger::open_channels_active_since(ledger.connection(), Utc::now() - window).await?;

    let mut proposed = 0;
    for channel in active {
        let user = match channel_ledger::parse_address(&channel.user_address) {
            Ok(user) => user,
            Err(e) => {
                error!(channel_id = channel.id, error = %e, "Skipping channel");
                continue;
            }
        };
        match channels.collateralize_if_necessary(user).await {
            Ok(Some(_)) => proposed += 1,
            Ok(None) => {}
            Err(e) => warn!(user = %user, error = %e, "Collateralization check failed"),
        }
    }
    Ok(proposed)
}
