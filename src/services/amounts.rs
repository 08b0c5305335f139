//! Monetary arithmetic
//!
//! All balances are `U256` internally and decimal strings at the edges
//! (ledger columns, JSON payloads). Conversions through an exchange rate
//! are explicit and always round down.

use alloy::primitives::U256;
use rust_decimal::Decimal;

/// Parse a base-10 amount
pub fn parse_amount(raw: &str) -> Result<U256, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty amount".to_string());
    }
    U256::from_str_radix(trimmed, 10).map_err(|e| format!("invalid amount '{}': {}", raw, e))
}

/// Rate as an integer fraction (numerator, denominator)
fn rate_fraction(rate: Decimal) -> Option<(U256, U256)> {
    if rate.is_sign_negative() || rate.is_zero() {
        return None;
    }
    let mantissa = u128::try_from(rate.mantissa()).ok()?;
    let denominator = U256::from(10u64).checked_pow(U256::from(rate.scale()))?;
    Some((U256::from(mantissa), denominator))
}

/// floor(value * rate)
pub fn mul_rate(value: U256, rate: Decimal) -> Option<U256> {
    let (num, den) = rate_fraction(rate)?;
    value.checked_mul(num).map(|v| v / den)
}

/// floor(value / rate)
pub fn div_rate(value: U256, rate: Decimal) -> Option<U256> {
    let (num, den) = rate_fraction(rate)?;
    value.checked_mul(den).map(|v| v / num)
}

/// `a - b`, or a validation message naming the field
pub fn checked_debit(balance: U256, amount: U256, field: &str) -> Result<U256, String> {
    balance
        .checked_sub(amount)
        .ok_or_else(|| format!("insufficient {}: have {}, need {}", field, balance, amount))
}

pub fn checked_credit(balance: U256, amount: U256, field: &str) -> Result<U256, String> {
    balance
        .checked_add(amount)
        .ok_or_else(|| format!("{} overflows", field))
}

/// Serde adapter: `U256` as a decimal string
pub mod decimal_string {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_amount(&raw).map_err(serde::de::Error::custom)
    }
}
