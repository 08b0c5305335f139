//! Onchain transaction lifecycle types
//!
//! State progresses: new → submitted → confirmed
//!                               ↘ failed
//!                     ↘ pending_failure → submitted | failed

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Signed and stored, not yet accepted by a node
    New,
    /// Accepted by a node at least once
    Submitted,
    /// A broadcast failed with an error that may or may not be final
    PendingFailure,
    Confirmed,
    Failed,
}

impl TransactionState {
    pub const NON_TERMINAL: [TransactionState; 3] = [
        TransactionState::New,
        TransactionState::Submitted,
        TransactionState::PendingFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::New => "new",
            TransactionState::Submitted => "submitted",
            TransactionState::PendingFailure => "pending_failure",
            TransactionState::Confirmed => "confirmed",
            TransactionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Confirmed | TransactionState::Failed)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(TransactionState::New),
            "submitted" => Ok(TransactionState::Submitted),
            "pending_failure" => Ok(TransactionState::PendingFailure),
            "confirmed" => Ok(TransactionState::Confirmed),
            "failed" => Ok(TransactionState::Failed),
            _ => Err(format!("Unknown transaction state: {}", s)),
        }
    }
}

/// Stored in the `meta` column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    /// "Component.method" of the handler to run on a terminal state
    pub complete_callback: Option<String>,
    /// Free-form description, e.g. the contract method
    pub reason: String,
}
