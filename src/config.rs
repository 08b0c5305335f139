//! Hub configuration
//!
//! Everything is read from environment variables with defaults; only the
//! connection settings are required.

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::HubError;
use crate::services::amounts::parse_amount;

const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_ETH_RPC_URL: &str = "ETH_RPC_URL";
const ENV_HUB_PRIVATE_KEY: &str = "HUB_PRIVATE_KEY";
const ENV_CHANNEL_MANAGER_ADDRESS: &str = "CHANNEL_MANAGER_ADDRESS";

const ENV_TX_POLL_INTERVAL: &str = "TX_POLL_INTERVAL_SECS";
const ENV_DISPUTE_POLL_INTERVAL: &str = "DISPUTE_POLL_INTERVAL_SECS";
const ENV_GAS_POLL_INTERVAL: &str = "GAS_POLL_INTERVAL_SECS";
const ENV_COLLATERAL_POLL_INTERVAL: &str = "COLLATERAL_POLL_INTERVAL_SECS";
const ENV_PENDING_UPDATE_TTL: &str = "PENDING_UPDATE_TTL_SECS";
const ENV_PENDING_STATE_TIMEOUT: &str = "PENDING_STATE_TIMEOUT_SECS";
const ENV_CHANNEL_BEI_LIMIT: &str = "CHANNEL_BEI_LIMIT";
const ENV_CHANNEL_BEI_DEPOSIT: &str = "CHANNEL_BEI_DEPOSIT";
const ENV_BEI_MIN_COLLATERALIZATION: &str = "BEI_MIN_COLLATERALIZATION";
const ENV_BEI_MAX_COLLATERALIZATION: &str = "BEI_MAX_COLLATERALIZATION";
const ENV_THREAD_BEI_LIMIT: &str = "THREAD_BEI_LIMIT";
const ENV_MIN_COLLATERAL_MULTIPLE: &str = "MIN_COLLATERAL_MULTIPLE";
const ENV_MAX_COLLATERAL_MULTIPLE: &str = "MAX_COLLATERAL_MULTIPLE";
const ENV_RECENT_PAYMENTS_WINDOW: &str = "RECENT_PAYMENTS_WINDOW_SECS";

/// One token (BOOTY) in base units
const BOOTY: u64 = 1_000_000_000_000_000_000;

/// Collateral sizing knobs
#[derive(Debug, Clone)]
pub struct CollateralConfig {
    /// Upper bound on the booty a channel may be topped up to on a user deposit
    pub channel_bei_limit: U256,
    /// Upper bound on a single hub booty deposit
    pub channel_bei_deposit: U256,
    /// Per-tipper baseline
    pub bei_min_collateralization: U256,
    /// Global cap
    pub bei_max_collateralization: U256,
    /// Booty per recent counterparty
    pub thread_bei_limit: U256,
    pub min_collateral_multiple: Decimal,
    pub max_collateral_multiple: Decimal,
    pub recent_payments_window: Duration,
}

impl Default for CollateralConfig {
    fn default() -> Self {
        Self {
            channel_bei_limit: U256::from(69u64) * U256::from(BOOTY),
            channel_bei_deposit: U256::from(50u64) * U256::from(BOOTY),
            bei_min_collateralization: U256::from(10u64) * U256::from(BOOTY),
            bei_max_collateralization: U256::from(169u64) * U256::from(BOOTY),
            thread_bei_limit: U256::from(10u64) * U256::from(BOOTY),
            min_collateral_multiple: dec!(0.5),
            max_collateral_multiple: dec!(1.5),
            recent_payments_window: Duration::from_secs(600),
        }
    }
}

/// Timers of the onchain transaction state machine
#[derive(Debug, Clone)]
pub struct OnchainTransactionConfig {
    /// Rebroadcast a submitted transaction that is not visible after this long
    pub rebroadcast_after: Duration,
    /// Give up on a visible but unconfirmed transaction after this long
    pub confirmation_timeout: Duration,
    /// Rebroadcast interval while in pending_failure
    pub pending_failure_rebroadcast_after: Duration,
    /// Give up on pending_failure after this long
    pub pending_failure_timeout: Duration,
    /// Hard bound on a completion callback
    pub callback_timeout: Duration,
    /// Kick off a poll once the submitting ledger transaction commits
    pub poll_after_commit: bool,
}

impl Default for OnchainTransactionConfig {
    fn default() -> Self {
        Self {
            rebroadcast_after: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(15 * 60),
            pending_failure_rebroadcast_after: Duration::from_secs(30),
            pending_failure_timeout: Duration::from_secs(5 * 60),
            callback_timeout: Duration::from_secs(60),
            poll_after_commit: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub channel_manager_address: Address,
    pub tx_poll_interval: Duration,
    pub dispute_poll_interval: Duration,
    pub gas_poll_interval: Duration,
    pub collateral_poll_interval: Duration,
    pub pending_update_ttl: Duration,
    /// Added to chain time to form the `timeout` of pending states
    pub pending_state_timeout_secs: u64,
    /// Rates older than this are refused
    pub max_exchange_rate_age: chrono::Duration,
    pub collateral: CollateralConfig,
    pub onchain: OnchainTransactionConfig,
}

impl HubConfig {
    pub fn new(channel_manager_address: Address) -> Self {
        Self {
            channel_manager_address,
            tx_poll_interval: Duration::from_secs(5),
            dispute_poll_interval: Duration::from_secs(180),
            gas_poll_interval: Duration::from_secs(60),
            collateral_poll_interval: Duration::from_secs(300),
            pending_update_ttl: Duration::from_secs(300),
            pending_state_timeout_secs: 600,
            max_exchange_rate_age: chrono::Duration::hours(24),
            collateral: CollateralConfig::default(),
            onchain: OnchainTransactionConfig::default(),
        }
    }

    /// Build the config from the environment, using defaults for anything unset
    pub fn from_env() -> Result<Self, HubError> {
        let contract = required(ENV_CHANNEL_MANAGER_ADDRESS)?;
        let contract = Address::from_str(&contract).map_err(|e| {
            HubError::Config(format!("Invalid {}: {}", ENV_CHANNEL_MANAGER_ADDRESS, e))
        })?;

        let mut config = Self::new(contract);
        config.tx_poll_interval = secs_or(ENV_TX_POLL_INTERVAL, config.tx_poll_interval);
        config.dispute_poll_interval = secs_or(ENV_DISPUTE_POLL_INTERVAL, config.dispute_poll_interval);
        config.gas_poll_interval = secs_or(ENV_GAS_POLL_INTERVAL, config.gas_poll_interval);
        config.collateral_poll_interval =
            secs_or(ENV_COLLATERAL_POLL_INTERVAL, config.collateral_poll_interval);
        config.pending_update_ttl = secs_or(ENV_PENDING_UPDATE_TTL, config.pending_update_ttl);
        config.pending_state_timeout_secs = env::var(ENV_PENDING_STATE_TIMEOUT)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.pending_state_timeout_secs);

        let collateral = &mut config.collateral;
        collateral.channel_bei_limit = amount_or(ENV_CHANNEL_BEI_LIMIT, collateral.channel_bei_limit)?;
        collateral.channel_bei_deposit =
            amount_or(ENV_CHANNEL_BEI_DEPOSIT, collateral.channel_bei_deposit)?;
        collateral.bei_min_collateralization =
            amount_or(ENV_BEI_MIN_COLLATERALIZATION, collateral.bei_min_collateralization)?;
        collateral.bei_max_collateralization =
            amount_or(ENV_BEI_MAX_COLLATERALIZATION, collateral.bei_max_collateralization)?;
        collateral.thread_bei_limit = amount_or(ENV_THREAD_BEI_LIMIT, collateral.thread_bei_limit)?;
        collateral.min_collateral_multiple =
            decimal_or(ENV_MIN_COLLATERAL_MULTIPLE, collateral.min_collateral_multiple)?;
        collateral.max_collateral_multiple =
            decimal_or(ENV_MAX_COLLATERAL_MULTIPLE, collateral.max_collateral_multiple)?;
        collateral.recent_payments_window =
            secs_or(ENV_RECENT_PAYMENTS_WINDOW, collateral.recent_payments_window);

        Ok(config)
    }
}

/// Connection settings the binary cannot start without
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub database_url: String,
    pub eth_rpc_url: String,
    pub hub_private_key: String,
}

impl ConnectionConfig {
    pub fn from_env() -> Result<Self, HubError> {
        Ok(Self {
            database_url: required(ENV_DATABASE_URL)?,
            eth_rpc_url: required(ENV_ETH_RPC_URL)?,
            hub_private_key: required(ENV_HUB_PRIVATE_KEY)?,
        })
    }
}

fn required(name: &str) -> Result<String, HubError> {
    env::var(name).map_err(|_| HubError::Config(format!("{} must be set", name)))
}

fn secs_or(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn amount_or(name: &str, default: U256) -> Result<U256, HubError> {
    match env::var(name) {
        Ok(raw) => parse_amount(&raw)
            .map_err(|e| HubError::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn decimal_or(name: &str, default: Decimal) -> Result<Decimal, HubError> {
    match env::var(name) {
        Ok(raw) => Decimal::from_str(&raw)
            .map_err(|e| HubError::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
