//! Collateralization policy
//!
//! Sizes the hub's token (BOOTY) balance in a channel. Users who receive
//! many tips need more hub collateral to keep paying them out.

use alloy::primitives::{Address, U256};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::CollateralConfig;
use crate::error::HubError;
use crate::models::channel::ChannelState;
use crate::models::update::Party;
use crate::services::amounts::{div_rate, mul_rate};
use crate::services::threads::ThreadService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralTargets {
    pub min_amount: U256,
    pub max_amount: U256,
    pub has_recent_payments: bool,
}

/// Targets for a user with `recent_tippers` distinct recent counterparties
pub fn targets(config: &CollateralConfig, recent_tippers: u64) -> CollateralTargets {
    let activity = config.thread_bei_limit.saturating_mul(U256::from(recent_tippers));
    let baseline = config.bei_min_collateralization;

    let min_amount = mul_rate(baseline.max(activity), config.min_collateral_multiple)
        .unwrap_or(U256::ZERO);
    let scaled_activity = mul_rate(activity, config.max_collateral_multiple).unwrap_or(U256::ZERO);
    let max_amount = config.bei_max_collateralization.min(baseline.max(scaled_activity));

    CollateralTargets {
        min_amount,
        max_amount,
        has_recent_payments: recent_tippers > 0,
    }
}

/// Hub booty to deposit alongside a user's wei deposit:
/// `min(channelBeiDeposit, max(0, min(channelBeiLimit, wei * rate) - hubBooty))`
pub fn deposit_collateral(
    config: &CollateralConfig,
    user_wei_deposit: U256,
    rate: Decimal,
    current_hub_booty: U256,
) -> U256 {
    let requested = mul_rate(user_wei_deposit, rate).unwrap_or(config.channel_bei_limit);
    let target = config.channel_bei_limit.min(requested);
    target
        .saturating_sub(current_hub_booty)
        .min(config.channel_bei_deposit)
}

/// Top-up needed to bring the hub balance back into range, if any.
/// Balances above `max_amount` are left alone.
pub fn recollateralization_amount(targets: &CollateralTargets, current_hub_booty: U256) -> Option<U256> {
    if current_hub_booty >= targets.min_amount {
        return None;
    }
    let amount = targets.max_amount.saturating_sub(current_hub_booty);
    (!amount.is_zero()).then_some(amount)
}

/// Hub booty to keep after a withdrawal: enough to buy back the wei the user
/// leaves in the channel, and no less than the policy maximum.
pub fn withdrawal_hub_target(targets: &CollateralTargets, remaining_user_wei: U256, rate: Decimal) -> U256 {
    let exchange_backing = mul_rate(remaining_user_wei, rate).unwrap_or(U256::MAX);
    exchange_backing.max(targets.max_amount)
}

/// Cap an exchange at what both sides can back. Returns (tokens, wei) to sell.
pub fn cap_exchange(
    state: &ChannelState,
    seller: Party,
    rate: Decimal,
    tokens_to_sell: U256,
    wei_to_sell: U256,
) -> (U256, U256) {
    let (seller_tokens, seller_wei, buyer_tokens, buyer_wei) = match seller {
        Party::User => (
            state.balance_token_user,
            state.balance_wei_user,
            state.balance_token_hub,
            state.balance_wei_hub,
        ),
        Party::Hub => (
            state.balance_token_hub,
            state.balance_wei_hub,
            state.balance_token_user,
            state.balance_wei_user,
        ),
    };

    // Tokens the buyer's wei can pay for, and wei the buyer's tokens can pay for
    let tokens_backed = mul_rate(buyer_wei, rate).unwrap_or(U256::ZERO);
    let wei_backed = div_rate(buyer_tokens, rate).unwrap_or(U256::ZERO);

    (
        tokens_to_sell.min(seller_tokens).min(tokens_backed),
        wei_to_sell.min(seller_wei).min(wei_backed),
    )
}

/// Policy bound to the thread subsystem's view of recent activity
pub struct CollateralizationPolicy {
    config: CollateralConfig,
    threads: Arc<dyn ThreadService>,
}

impl CollateralizationPolicy {
    pub fn new(config: CollateralConfig, threads: Arc<dyn ThreadService>) -> Self {
        Self { config, threads }
    }

    pub fn config(&self) -> &CollateralConfig {
        &self.config
    }

    pub async fn targets_for(&self, user: Address) -> Result<CollateralTargets, HubError> {
        let window = chrono::Duration::from_std(self.config.recent_payments_window)
            .map_err(|e| HubError::Config(format!("Invalid recent payments window: {}", e)))?;
        let recent = self
            .threads
            .recent_tipper_count(user, Utc::now() - window)
            .await?;
        Ok(targets(&self.config, recent))
    }
}
