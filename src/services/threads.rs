//! Thread subsystem seam
//!
//! Threads (sub-channels between two users routed through the hub) live
//! outside this service. The channel state machine only needs the
//! successor state for OpenThread/CloseThread and a count of recent
//! counterparties for collateral sizing.

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::HubError;
use crate::ledger::LedgerTxn;
use crate::models::channel::ChannelState;
use crate::models::update::ThreadArgs;

#[async_trait]
pub trait ThreadService: Send + Sync {
    /// Distinct users who opened a thread to `user` since `since`
    async fn recent_tipper_count(&self, user: Address, since: DateTime<Utc>) -> Result<u64, HubError>;

    /// Successor of `prev` with the thread opened
    async fn open_thread(
        &self,
        txn: &LedgerTxn,
        prev: &ChannelState,
        args: &ThreadArgs,
    ) -> Result<ChannelState, HubError>;

    /// Successor of `prev` with the thread closed
    async fn close_thread(
        &self,
        txn: &LedgerTxn,
        prev: &ChannelState,
        args: &ThreadArgs,
    ) -> Result<ChannelState, HubError>;
}

/// Deployment without threads
pub struct ThreadsDisabled;

#[async_trait]
impl ThreadService for ThreadsDisabled {
    async fn recent_tipper_count(&self, _user: Address, _since: DateTime<Utc>) -> Result<u64, HubError> {
        Ok(0)
    }

    async fn open_thread(
        &self,
        _txn: &LedgerTxn,
        _prev: &ChannelState,
        args: &ThreadArgs,
    ) -> Result<ChannelState, HubError> {
        Err(HubError::validation(format!(
            "Threads are disabled (thread {} from {})",
            args.thread_id, args.sender
        )))
    }

    async fn close_thread(
        &self,
        _txn: &LedgerTxn,
        _prev: &ChannelState,
        args: &ThreadArgs,
    ) -> Result<ChannelState, HubError> {
        Err(HubError::validation(format!(
            "Threads are disabled (thread {} from {})",
            args.thread_id, args.sender
        )))
    }
}
