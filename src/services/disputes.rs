//! Channel disputes
//!
//! A unilateral exit moves the channel to `CS_CHANNEL_DISPUTE` and submits
//! `startExit`. Once the challenge period has passed on-chain, the close
//! watcher submits `emptyChannel`, at most once per dispute.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::entities::prelude::{ChannelDisputes, Channels};
use crate::entities::{channel_disputes, channels, onchain_transactions};
use crate::error::HubError;
use crate::ledger::Ledger;
use crate::models::channel::ChannelStatus;
use crate::models::dispute::DisputeStatus;
use crate::models::onchain_transaction::{TransactionMeta, TransactionState};
use crate::services::callbacks::{CompletionCallback, CompletionHandler};
use crate::services::chain_client::{
    encode_empty_channel, encode_start_exit, ChainClient, CHAIN_STATUS_CHANNEL_DISPUTE,
};
use crate::services::channel_ledger;
use crate::services::onchain_transactions::{OnchainTransactionManager, OnchainTransactionRequest};
use crate::services::signer::HubSigner;

pub struct DisputesService {
    ledger: Ledger,
    config: HubConfig,
    signer: Arc<HubSigner>,
    chain: Arc<dyn ChainClient>,
    transactions: Arc<OnchainTransactionManager>,
}

async fn active_dispute<C: ConnectionTrait>(
    db: &C,
    channel_id: i32,
) -> Result<Option<channel_disputes::Model>, HubError> {
    Ok(ChannelDisputes::find()
        .filter(channel_disputes::Column::ChannelId.eq(channel_id))
        .filter(channel_disputes::Column::Status.is_in([
            DisputeStatus::Pending.as_str(),
            DisputeStatus::InDisputePeriod.as_str(),
        ]))
        .order_by_desc(channel_disputes::Column::Id)
        .one(db)
        .await?)
}

async fn set_dispute_status<C: ConnectionTrait>(
    db: &C,
    dispute_id: i32,
    status: DisputeStatus,
) -> Result<(), HubError> {
    ChannelDisputes::update_many()
        .col_expr(channel_disputes::Column::Status, Expr::value(status.as_str()))
        .filter(channel_disputes::Column::Id.eq(dispute_id))
        .exec(db)
        .await?;
    Ok(())
}

impl DisputesService {
    pub fn new(
        ledger: Ledger,
        config: HubConfig,
        signer: Arc<HubSigner>,
        chain: Arc<dyn ChainClient>,
        transactions: Arc<OnchainTransactionManager>,
    ) -> Self {
        Self {
            ledger,
            config,
            signer,
            chain,
            transactions,
        }
    }

    fn contract(&self) -> Address {
        self.config.channel_manager_address
    }

    fn request(
        &self,
        data: Bytes,
        callback: CompletionCallback,
        reason: &str,
    ) -> OnchainTransactionRequest {
        OnchainTransactionRequest {
            from: self.signer.address(),
            to: self.contract(),
            value: U256::ZERO,
            data,
            gas: None,
            meta: TransactionMeta {
                complete_callback: Some(callback.as_str().to_string()),
                reason: reason.to_string(),
            },
        }
    }

    /// Start a unilateral exit of `user`'s channel from the hub's side
    pub async fn start_unilateral_exit(
        &self,
        user: Address,
        reason: &str,
    ) -> Result<channel_disputes::Model, HubError> {
        let mut txn = self.ledger.begin().await?;
        let channel = channel_ledger::lock_channel(&txn, self.contract(), user).await?;

        let status: ChannelStatus = channel.status.parse().map_err(HubError::Fatal)?;
        if status != ChannelStatus::Open {
            return Err(HubError::validation(format!(
                "Cannot start exit for {}: channel is {}",
                user, status
            )));
        }
        if let Some(existing) = active_dispute(txn.conn(), channel.id).await? {
            return Err(HubError::validation(format!(
                "Channel for {} already has dispute {} in {}",
                user, existing.id, existing.status
            )));
        }

        let request = self.request(encode_start_exit(user), CompletionCallback::StartExit, "startExit");
        let tx = self.transactions.send_transaction(&mut txn, request).await?;

        let dispute = channel_disputes::ActiveModel {
            channel_id: Set(channel.id),
            started_on: Set(Utc::now()),
            reason: Set(reason.to_string()),
            status: Set(DisputeStatus::Pending.as_str().to_string()),
            onchain_tx_id_start: Set(Some(tx.id)),
            onchain_tx_id_empty: Set(None),
            dispute_period_ends: Set(None),
            ..Default::default()
        }
        .insert(txn.conn())
        .await?;

        channel_ledger::set_channel_status(txn.conn(), channel.id, ChannelStatus::ChannelDispute).await?;
        txn.commit().await?;

        info!(
            user = %user,
            dispute_id = dispute.id,
            logical_id = tx.id,
            reason = %reason,
            "Started unilateral exit"
        );
        Ok(dispute)
    }

    /// Submit `emptyChannel` for every dispute whose challenge period has
    /// elapsed on-chain. Returns how many were submitted.
    pub async fn close_expired_disputes(&self) -> Result<usize, HubError> {
        let disputed =
            channel_ledger::channels_with_status(self.ledger.connection(), ChannelStatus::ChannelDispute)
                .await?;
        if disputed.is_empty() {
            return Ok(0);
        }

        let mut submitted = 0;
        for channel in disputed {
            match self.close_if_expired(&channel).await {
                Ok(true) => submitted += 1,
                Ok(false) => {}
                Err(e) => error!(
                    channel_id = channel.id,
                    user = %channel.user_address,
                    error = %e,
                    "Failed to check dispute"
                ),
            }
        }
        Ok(submitted)
    }

    async fn close_if_expired(&self, channel: &channels::Model) -> Result<bool, HubError> {
        let Some(dispute) = ChannelDisputes::find()
            .filter(channel_disputes::Column::ChannelId.eq(channel.id))
            .filter(channel_disputes::Column::Status.eq(DisputeStatus::InDisputePeriod.as_str()))
            .filter(channel_disputes::Column::OnchainTxIdEmpty.is_null())
            .one(self.ledger.connection())
            .await?
        else {
            debug!(channel_id = channel.id, "No dispute awaiting close");
            return Ok(false);
        };

        let user = channel_ledger::parse_address(&channel.user_address)?;
        let details = self.chain.channel_details(self.contract(), user).await?;
        if details.status != CHAIN_STATUS_CHANNEL_DISPUTE {
            debug!(
                user = %user,
                chain_status = details.status,
                "Dispute already cleared on-chain"
            );
            return Ok(false);
        }

        let challenge_period = self.chain.challenge_period(self.contract()).await?;
        let period_ends = dispute_period_end(details.channel_closing_time, challenge_period)?;
        let now = self.chain.latest_block_timestamp().await?;
        if now <= period_ends {
            debug!(
                user = %user,
                now = now,
                period_ends = period_ends,
                "Challenge period still running"
            );
            return Ok(false);
        }

        let mut txn = self.ledger.begin().await?;
        let locked = ChannelDisputes::find_by_id(dispute.id)
            .lock_exclusive()
            .one(txn.conn())
            .await?
            .ok_or_else(|| HubError::fatal(format!("Dispute {} vanished", dispute.id)))?;
        if locked.onchain_tx_id_empty.is_some() {
            txn.rollback().await?;
            return Ok(false);
        }

        let request = self.request(encode_empty_channel(user), CompletionCallback::EmptyChannel, "emptyChannel");
        let tx = self.transactions.send_transaction(&mut txn, request).await?;

        ChannelDisputes::update_many()
            .col_expr(channel_disputes::Column::OnchainTxIdEmpty, Expr::value(tx.id))
            .col_expr(channel_disputes::Column::DisputePeriodEnds, Expr::value(period_ends as i64))
            .filter(channel_disputes::Column::Id.eq(locked.id))
            .exec(txn.conn())
            .await?;
        txn.commit().await?;

        info!(
            user = %user,
            dispute_id = locked.id,
            logical_id = tx.id,
            period_ends = period_ends,
            "Submitted emptyChannel"
        );
        Ok(true)
    }

    async fn channel_of(&self, dispute: &channel_disputes::Model) -> Result<channels::Model, HubError> {
        Channels::find_by_id(dispute.channel_id)
            .one(self.ledger.connection())
            .await?
            .ok_or_else(|| HubError::fatal(format!("Dispute {} has no channel", dispute.id)))
    }

    async fn on_start_exit_complete(&self, tx: &onchain_transactions::Model) -> Result<(), HubError> {
        let Some(dispute) = ChannelDisputes::find()
            .filter(channel_disputes::Column::OnchainTxIdStart.eq(tx.id))
            .one(self.ledger.connection())
            .await?
        else {
            warn!(logical_id = tx.id, "No dispute references startExit transaction");
            return Ok(());
        };
        let channel = self.channel_of(&dispute).await?;

        match tx.state.parse::<TransactionState>().map_err(HubError::Fatal)? {
            TransactionState::Confirmed => {
                let user = channel_ledger::parse_address(&channel.user_address)?;
                let details = self.chain.channel_details(self.contract(), user).await?;
                let challenge_period = self.chain.challenge_period(self.contract()).await?;
                let period_ends = dispute_period_end(details.channel_closing_time, challenge_period)?;

                ChannelDisputes::update_many()
                    .col_expr(
                        channel_disputes::Column::Status,
                        Expr::value(DisputeStatus::InDisputePeriod.as_str()),
                    )
                    .col_expr(channel_disputes::Column::DisputePeriodEnds, Expr::value(period_ends as i64))
                    .filter(channel_disputes::Column::Id.eq(dispute.id))
                    .exec(self.ledger.connection())
                    .await?;
                info!(user = %user, dispute_id = dispute.id, period_ends = period_ends, "Dispute period started");
            }
            TransactionState::Failed => {
                let txn = self.ledger.begin().await?;
                set_dispute_status(txn.conn(), dispute.id, DisputeStatus::Failed).await?;
                channel_ledger::set_channel_status(txn.conn(), channel.id, ChannelStatus::Open).await?;
                txn.commit().await?;
                warn!(
                    dispute_id = dispute.id,
                    reason = ?tx.failed_reason,
                    "startExit failed, channel reopened"
                );
            }
            other => {
                return Err(HubError::fatal(format!(
                    "startExit callback for transaction {} in state {}",
                    tx.id, other
                )));
            }
        }
        Ok(())
    }

    async fn on_empty_channel_complete(&self, tx: &onchain_transactions::Model) -> Result<(), HubError> {
        let Some(dispute) = ChannelDisputes::find()
            .filter(channel_disputes::Column::OnchainTxIdEmpty.eq(tx.id))
            .one(self.ledger.connection())
            .await?
        else {
            warn!(logical_id = tx.id, "No dispute references emptyChannel transaction");
            return Ok(());
        };

        match tx.state.parse::<TransactionState>().map_err(HubError::Fatal)? {
            TransactionState::Confirmed => {
                let channel = self.channel_of(&dispute).await?;
                let txn = self.ledger.begin().await?;
                set_dispute_status(txn.conn(), dispute.id, DisputeStatus::Finished).await?;
                channel_ledger::set_channel_status(txn.conn(), channel.id, ChannelStatus::Open).await?;
                txn.commit().await?;
                info!(dispute_id = dispute.id, user = %channel.user_address, "Channel emptied, dispute finished");
            }
            TransactionState::Failed => {
                set_dispute_status(self.ledger.connection(), dispute.id, DisputeStatus::Failed).await?;
                error!(
                    dispute_id = dispute.id,
                    reason = ?tx.failed_reason,
                    "emptyChannel failed, dispute needs operator attention"
                );
            }
            other => {
                return Err(HubError::fatal(format!(
                    "emptyChannel callback for transaction {} in state {}",
                    tx.id, other
                )));
            }
        }
        Ok(())
    }

    pub async fn dispute_for(&self, user: Address) -> Result<Option<channel_disputes::Model>, HubError> {
        let Some(channel) = channel_ledger::find_channel(self.ledger.connection(), user).await? else {
            return Ok(None);
        };
        Ok(ChannelDisputes::find()
            .filter(channel_disputes::Column::ChannelId.eq(channel.id))
            .order_by_desc(channel_disputes::Column::Id)
            .one(self.ledger.connection())
            .await?)
    }
}

#[async_trait]
impl CompletionHandler for DisputesService {
    async fn on_transaction_complete(
        &self,
        callback: CompletionCallback,
        tx: &onchain_transactions::Model,
    ) -> Result<(), HubError> {
        match callback {
            CompletionCallback::StartExit => self.on_start_exit_complete(tx).await,
            CompletionCallback::EmptyChannel => self.on_empty_channel_complete(tx).await,
            other => Err(HubError::Config(format!("DisputesService does not handle {}", other))),
        }
    }
}

fn dispute_period_end(channel_closing_time: u64, challenge_period: u64) -> Result<u64, HubError> {
    channel_closing_time.checked_add(challenge_period).ok_or_else(|| {
        HubError::fatal(format!(
            "Dispute period overflows: closing time {} plus challenge period {}",
            channel_closing_time, challenge_period
        ))
    })
}
