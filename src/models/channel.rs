//! Channel state types
//!
//! A `ChannelState` is the bilateral ledger snapshot both parties sign.
//! Pending deposits are not yet part of the balances; pending withdrawals
//! have already been taken out of them.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::services::amounts::decimal_string;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub contract_address: Address,
    pub user: Address,
    pub recipient: Address,

    #[serde(with = "decimal_string")]
    pub balance_wei_hub: U256,
    #[serde(with = "decimal_string")]
    pub balance_wei_user: U256,
    #[serde(with = "decimal_string")]
    pub balance_token_hub: U256,
    #[serde(with = "decimal_string")]
    pub balance_token_user: U256,

    #[serde(with = "decimal_string")]
    pub pending_deposit_wei_hub: U256,
    #[serde(with = "decimal_string")]
    pub pending_deposit_wei_user: U256,
    #[serde(with = "decimal_string")]
    pub pending_deposit_token_hub: U256,
    #[serde(with = "decimal_string")]
    pub pending_deposit_token_user: U256,
    #[serde(with = "decimal_string")]
    pub pending_withdrawal_wei_hub: U256,
    #[serde(with = "decimal_string")]
    pub pending_withdrawal_wei_user: U256,
    #[serde(with = "decimal_string")]
    pub pending_withdrawal_token_hub: U256,
    #[serde(with = "decimal_string")]
    pub pending_withdrawal_token_user: U256,

    pub tx_count_global: u64,
    pub tx_count_chain: u64,
    pub thread_root: B256,
    pub thread_count: u64,
    /// Unix seconds (chain time); 0 when nothing is pending
    pub timeout: u64,
}

impl ChannelState {
    /// State of a channel that has never been updated
    pub fn empty(contract_address: Address, user: Address) -> Self {
        Self {
            contract_address,
            user,
            recipient: user,
            balance_wei_hub: U256::ZERO,
            balance_wei_user: U256::ZERO,
            balance_token_hub: U256::ZERO,
            balance_token_user: U256::ZERO,
            pending_deposit_wei_hub: U256::ZERO,
            pending_deposit_wei_user: U256::ZERO,
            pending_deposit_token_hub: U256::ZERO,
            pending_deposit_token_user: U256::ZERO,
            pending_withdrawal_wei_hub: U256::ZERO,
            pending_withdrawal_wei_user: U256::ZERO,
            pending_withdrawal_token_hub: U256::ZERO,
            pending_withdrawal_token_user: U256::ZERO,
            tx_count_global: 0,
            tx_count_chain: 0,
            thread_root: B256::ZERO,
            thread_count: 0,
            timeout: 0,
        }
    }

    pub fn pending_fields(&self) -> [U256; 8] {
        [
            self.pending_deposit_wei_hub,
            self.pending_deposit_wei_user,
            self.pending_deposit_token_hub,
            self.pending_deposit_token_user,
            self.pending_withdrawal_wei_hub,
            self.pending_withdrawal_wei_user,
            self.pending_withdrawal_token_hub,
            self.pending_withdrawal_token_user,
        ]
    }

    /// True while an on-chain operation is in flight
    pub fn has_pending_ops(&self) -> bool {
        self.pending_fields().iter().any(|v| !v.is_zero())
    }

    pub fn clear_pending(&mut self) {
        self.pending_deposit_wei_hub = U256::ZERO;
        self.pending_deposit_wei_user = U256::ZERO;
        self.pending_deposit_token_hub = U256::ZERO;
        self.pending_deposit_token_user = U256::ZERO;
        self.pending_withdrawal_wei_hub = U256::ZERO;
        self.pending_withdrawal_wei_user = U256::ZERO;
        self.pending_withdrawal_token_hub = U256::ZERO;
        self.pending_withdrawal_token_user = U256::ZERO;
    }
}

/// A state with whatever signatures it has collected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedChannelState {
    pub state: ChannelState,
    pub sig_hub: Option<String>,
    pub sig_user: Option<String>,
}

impl SignedChannelState {
    pub fn is_fully_signed(&self) -> bool {
        self.sig_hub.is_some() && self.sig_user.is_some()
    }
}

/// Channel lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    #[serde(rename = "CS_OPEN")]
    Open,
    #[serde(rename = "CS_CHANNEL_DISPUTE")]
    ChannelDispute,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Open => "CS_OPEN",
            ChannelStatus::ChannelDispute => "CS_CHANNEL_DISPUTE",
        }
    }
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChannelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CS_OPEN" => Ok(ChannelStatus::Open),
            "CS_CHANNEL_DISPUTE" => Ok(ChannelStatus::ChannelDispute),
            _ => Err(format!("Unknown channel status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state_has_no_pending_ops() {
        let state = ChannelState::empty(Address::ZERO, Address::repeat_byte(1));
        assert!(!state.has_pending_ops());
        assert_eq!(state.recipient, state.user);
    }

    #[test]
    fn test_pending_detection_and_clear() {
        let mut state = ChannelState::empty(Address::ZERO, Address::repeat_byte(1));
        state.pending_withdrawal_token_hub = U256::from(5u64);
        assert!(state.has_pending_ops());
        state.clear_pending();
        assert!(!state.has_pending_ops());
    }

    #[test]
    fn test_channel_status_roundtrip() {
        for status in [ChannelStatus::Open, ChannelStatus::ChannelDispute] {
            assert_eq!(status.as_str().parse::<ChannelStatus>().unwrap(), status);
        }
        assert!("CS_THREAD_DISPUTE".parse::<ChannelStatus>().is_err());
    }
}
