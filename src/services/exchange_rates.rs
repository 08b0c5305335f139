//! Latest exchange rate lookup
//!
//! Rates are token base units per wei (BOOTY per ETH). A rate older than
//! the configured maximum age is never used to size a transfer.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, QueryOrder, Set};
use std::str::FromStr;
use tracing::{error, info};

use crate::entities::exchange_rates::{self, Entity as ExchangeRates};
use crate::error::HubError;

/// Most recent rate, refused if older than `max_age`
pub async fn latest_rate<C: ConnectionTrait>(
    db: &C,
    max_age: Duration,
) -> Result<Decimal, HubError> {
    let latest = ExchangeRates::find()
        .order_by_desc(exchange_rates::Column::RetrievedAt)
        .order_by_desc(exchange_rates::Column::Id)
        .one(db)
        .await?
        .ok_or(HubError::MissingExchangeRate)?;

    let age = Utc::now().signed_duration_since(latest.retrieved_at);
    if age > max_age {
        error!(
            retrieved_at = %latest.retrieved_at,
            age_secs = age.num_seconds(),
            "Refusing stale exchange rate"
        );
        return Err(HubError::StaleExchangeRate {
            age_secs: age.num_seconds(),
        });
    }

    let rate = Decimal::from_str(&latest.rate_usd)
        .map_err(|e| HubError::fatal(format!("Stored exchange rate '{}' is invalid: {}", latest.rate_usd, e)))?;
    if rate <= Decimal::ZERO {
        return Err(HubError::fatal(format!("Stored exchange rate is not positive: {}", rate)));
    }
    Ok(rate)
}

pub async fn record_rate<C: ConnectionTrait>(
    db: &C,
    rate: Decimal,
) -> Result<exchange_rates::Model, HubError> {
    let model = exchange_rates::ActiveModel {
        retrieved_at: Set(Utc::now()),
        rate_usd: Set(rate.normalize().to_string()),
        ..Default::default()
    };
    let saved = model.insert(db).await?;
    info!(rate = %rate, "Recorded exchange rate");
    Ok(saved)
}
