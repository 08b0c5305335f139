//! Hub error type
//!
//! Validation and fatal errors propagate to the caller and roll back the
//! surrounding ledger transaction. Soft rejections are not errors: services
//! return `Ok(None)` for them.

use sea_orm::DbErr;

use crate::services::chain_client::ChainError;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Bad signature, wrong channel status, stale txCount, malformed params
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Exchange rate is stale: last retrieved {age_secs}s ago")]
    StaleExchangeRate { age_secs: i64 },

    #[error("No exchange rate has been recorded")]
    MissingExchangeRate,

    #[error("No gas estimate has been recorded")]
    MissingGasEstimate,

    /// A state declared structurally impossible
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("A pending update is already proposed for {user}")]
    PendingUpdateExists { user: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HubError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HubError::Validation(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        HubError::Fatal(msg.into())
    }

    /// Errors meant for operational alerting rather than the user
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HubError::Fatal(_)
                | HubError::StaleExchangeRate { .. }
                | HubError::MissingExchangeRate
                | HubError::MissingGasEstimate
                | HubError::Config(_)
        )
    }
}
