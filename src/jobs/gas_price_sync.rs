//! Gas Price Sync Job
//!
//! Records fast/average/safe-low estimates derived from the node's gas
//! price. Outgoing transactions read the newest record.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use crate::error::HubError;
use crate::ledger::Ledger;
use crate::services::chain_client::ChainClient;
use crate::services::gas_estimates::{self, GasTiers};

/// Start the gas price sync job
///
/// # Arguments
///
/// * `ledger` - Ledger the estimates are written to
/// * `chain` - Chain client to read the gas price from
/// * `poll_interval` - Time between syncs (`GAS_POLL_INTERVAL_SECS`)
pub async fn start_gas_price_sync_job(
    ledger: Ledger,
    chain: Arc<dyn ChainClient>,
    poll_interval: Duration,
) {
    tokio::spawn(async move {
        info!(poll_interval_secs = poll_interval.as_secs(), "Gas price sync job started");

        let mut interval = interval(poll_interval);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping gas price sync job");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = sync_gas_price(&ledger, chain.as_ref()).await {
                        error!(error = %e, "Gas price sync failed");
                    }
                }
            }
        }

        info!("Gas price sync job stopped");
    });
}

/// Fetch the node's gas price and store it as a new estimate
pub async fn sync_gas_price(ledger: &Ledger, chain: &dyn ChainClient) -> Result<GasTiers, HubError> {
    let price = chain.gas_price().await?;
    let tiers = GasTiers::from_node_price(price);
    gas_estimates::record_estimate(ledger.connection(), tiers, None).await?;
    Ok(tiers)
}
