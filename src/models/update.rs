//! Channel update arguments
//!
//! Every reason carries exactly the fields it needs. The JSON form
//! (`{"reason": ..., "args": {...}}`) is what lands in the `args` column
//! and in the pending-update cache.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::channel::SignedChannelState;
use crate::services::amounts::decimal_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Hub,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentArgs {
    pub recipient: Party,
    #[serde(with = "decimal_string")]
    pub amount_wei: U256,
    #[serde(with = "decimal_string")]
    pub amount_token: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeArgs {
    /// Tokens per wei, decimal string
    pub exchange_rate: String,
    pub seller: Party,
    #[serde(with = "decimal_string")]
    pub tokens_to_sell: U256,
    #[serde(with = "decimal_string")]
    pub wei_to_sell: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositArgs {
    #[serde(with = "decimal_string")]
    pub deposit_wei_hub: U256,
    #[serde(with = "decimal_string")]
    pub deposit_wei_user: U256,
    #[serde(with = "decimal_string")]
    pub deposit_token_hub: U256,
    #[serde(with = "decimal_string")]
    pub deposit_token_user: U256,
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalArgs {
    pub exchange_rate: String,
    /// Tokens the user sells to the hub as part of the withdrawal
    #[serde(with = "decimal_string")]
    pub tokens_to_sell: U256,
    /// Wei the user sells to the hub as part of the withdrawal
    #[serde(with = "decimal_string")]
    pub wei_to_sell: U256,
    pub recipient: Address,
    #[serde(with = "decimal_string")]
    pub withdrawal_wei_user: U256,
    #[serde(with = "decimal_string")]
    pub withdrawal_token_user: U256,
    #[serde(with = "decimal_string")]
    pub withdrawal_wei_hub: U256,
    #[serde(with = "decimal_string")]
    pub withdrawal_token_hub: U256,
    #[serde(with = "decimal_string")]
    pub deposit_wei_hub: U256,
    #[serde(with = "decimal_string")]
    pub deposit_token_hub: U256,
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPendingArgs {
    pub transaction_hash: B256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationReason {
    #[serde(rename = "CU_INVALID_TIMEOUT")]
    Timeout,
    #[serde(rename = "CU_INVALID_REJECTED")]
    Rejected,
    #[serde(rename = "CU_INVALID_ERROR")]
    TransactionFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationArgs {
    pub previous_valid_tx_count: u64,
    pub last_invalid_tx_count: u64,
    pub reason: InvalidationReason,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArgs {
    pub sender: Address,
    pub receiver: Address,
    pub thread_id: u64,
    #[serde(with = "decimal_string")]
    pub balance_wei_sender: U256,
    #[serde(with = "decimal_string")]
    pub balance_token_sender: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "args")]
pub enum UpdateArgs {
    Payment(PaymentArgs),
    Exchange(ExchangeArgs),
    ProposePendingDeposit(DepositArgs),
    ProposePendingWithdrawal(WithdrawalArgs),
    ConfirmPending(ConfirmPendingArgs),
    Invalidation(InvalidationArgs),
    OpenThread(ThreadArgs),
    CloseThread(ThreadArgs),
}

impl UpdateArgs {
    pub fn reason(&self) -> UpdateReason {
        match self {
            UpdateArgs::Payment(_) => UpdateReason::Payment,
            UpdateArgs::Exchange(_) => UpdateReason::Exchange,
            UpdateArgs::ProposePendingDeposit(_) => UpdateReason::ProposePendingDeposit,
            UpdateArgs::ProposePendingWithdrawal(_) => UpdateReason::ProposePendingWithdrawal,
            UpdateArgs::ConfirmPending(_) => UpdateReason::ConfirmPending,
            UpdateArgs::Invalidation(_) => UpdateReason::Invalidation,
            UpdateArgs::OpenThread(_) => UpdateReason::OpenThread,
            UpdateArgs::CloseThread(_) => UpdateReason::CloseThread,
        }
    }

    /// Countersigned versions of an update the hub proposed earlier
    pub fn is_proposal(&self) -> bool {
        matches!(
            self,
            UpdateArgs::Exchange(_) | UpdateArgs::ProposePendingDeposit(_) | UpdateArgs::ProposePendingWithdrawal(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateReason {
    Payment,
    Exchange,
    ProposePendingDeposit,
    ProposePendingWithdrawal,
    ConfirmPending,
    Invalidation,
    OpenThread,
    CloseThread,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateReason::Payment => "Payment",
            UpdateReason::Exchange => "Exchange",
            UpdateReason::ProposePendingDeposit => "ProposePendingDeposit",
            UpdateReason::ProposePendingWithdrawal => "ProposePendingWithdrawal",
            UpdateReason::ConfirmPending => "ConfirmPending",
            UpdateReason::Invalidation => "Invalidation",
            UpdateReason::OpenThread => "OpenThread",
            UpdateReason::CloseThread => "CloseThread",
        }
    }
}

impl std::fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An update submitted by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub args: UpdateArgs,
    /// txCountGlobal of the state this update produces
    pub tx_count: u64,
    pub sig_user: Option<String>,
}

/// A persisted update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdateRow {
    pub id: i32,
    pub args: UpdateArgs,
    pub state: SignedChannelState,
    pub invalid: bool,
    pub onchain_tx_logical_id: Option<i32>,
    pub created_on: DateTime<Utc>,
}

impl ChannelUpdateRow {
    pub fn reason(&self) -> UpdateReason {
        self.args.reason()
    }
}
