//! Gas price estimates
//!
//! Tiers are stored in gwei. Outgoing transactions always use the fast tier.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, QueryOrder, Set};
use std::str::FromStr;
use tracing::debug;

use crate::entities::gas_estimates::{self, Entity as GasEstimates};
use crate::error::HubError;

const WEI_PER_GWEI: Decimal = dec!(1000000000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasTiers {
    pub fast: Decimal,
    pub average: Decimal,
    pub safe_low: Decimal,
}

impl GasTiers {
    /// Tiers around the node's suggested price
    pub fn from_node_price(wei: u128) -> Self {
        let clamped = wei.min(u64::MAX as u128) as i128;
        let average = Decimal::from_i128_with_scale(clamped, 9).round_dp(3);
        Self {
            fast: (average * dec!(1.25)).round_dp(3),
            average,
            safe_low: (average * dec!(0.8)).round_dp(3),
        }
    }
}

/// Fast tier of the newest estimate, in wei
pub async fn latest_fast_gas_price<C: ConnectionTrait>(db: &C) -> Result<u128, HubError> {
    let latest = GasEstimates::find()
        .order_by_desc(gas_estimates::Column::RetrievedAt)
        .order_by_desc(gas_estimates::Column::Id)
        .one(db)
        .await?
        .ok_or(HubError::MissingGasEstimate)?;

    let gwei = Decimal::from_str(&latest.fast)
        .map_err(|e| HubError::fatal(format!("Stored gas estimate '{}' is invalid: {}", latest.fast, e)))?;

    gwei_to_wei(gwei)
}

fn gwei_to_wei(gwei: Decimal) -> Result<u128, HubError> {
    (gwei * WEI_PER_GWEI)
        .floor()
        .to_u128()
        .ok_or_else(|| HubError::fatal(format!("Gas price out of range: {} gwei", gwei)))
}

pub async fn record_estimate<C: ConnectionTrait>(
    db: &C,
    tiers: GasTiers,
    block_num: Option<u64>,
) -> Result<gas_estimates::Model, HubError> {
    let model = gas_estimates::ActiveModel {
        retrieved_at: Set(Utc::now()),
        fast: Set(tiers.fast.normalize().to_string()),
        average: Set(tiers.average.normalize().to_string()),
        safe_low: Set(tiers.safe_low.normalize().to_string()),
        block_num: Set(block_num.map(|b| b as i64)),
        ..Default::default()
    };
    let saved = model.insert(db).await?;
    debug!(fast = %tiers.fast, average = %tiers.average, "Recorded gas estimate");
    Ok(saved)
}
