//! Channel ledger queries
//!
//! Conversions between `channel_updates` rows and channel states, and the
//! locking reads the state machine relies on.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict}, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::str::FromStr;

use crate::entities::prelude::{ChannelUpdates, Channels};
use crate::entities::{channel_updates, channels};
use crate::error::HubError;
use crate::ledger::{address_key, LedgerTxn};
use crate::models::channel::{ChannelState, ChannelStatus, SignedChannelState};
use crate::models::update::{ChannelUpdateRow, UpdateArgs};
use crate::services::amounts::parse_amount;

fn corrupt(row: &channel_updates::Model, field: &str, err: impl std::fmt::Display) -> HubError {
    HubError::fatal(format!("channel_updates row {} has invalid {}: {}", row.id, field, err))
}

pub fn parse_address(raw: &str) -> Result<Address, HubError> {
    Address::from_str(raw).map_err(|e| HubError::fatal(format!("Invalid stored address '{}': {}", raw, e)))
}

pub fn state_from_row(row: &channel_updates::Model) -> Result<ChannelState, HubError> {
    let amount = |field: &str, raw: &str| parse_amount(raw).map_err(|e| corrupt(row, field, e));
    let address = |field: &str, raw: &str| Address::from_str(raw).map_err(|e| corrupt(row, field, e));

    Ok(ChannelState {
        contract_address: address("contract_address", &row.contract_address)?,
        user: address("user_address", &row.user_address)?,
        recipient: address("recipient", &row.recipient)?,
        balance_wei_hub: amount("balance_wei_hub", &row.balance_wei_hub)?,
        balance_wei_user: amount("balance_wei_user", &row.balance_wei_user)?,
        balance_token_hub: amount("balance_token_hub", &row.balance_token_hub)?,
        balance_token_user: amount("balance_token_user", &row.balance_token_user)?,
        pending_deposit_wei_hub: amount("pending_deposit_wei_hub", &row.pending_deposit_wei_hub)?,
        pending_deposit_wei_user: amount("pending_deposit_wei_user", &row.pending_deposit_wei_user)?,
        pending_deposit_token_hub: amount("pending_deposit_token_hub", &row.pending_deposit_token_hub)?,
        pending_deposit_token_user: amount("pending_deposit_token_user", &row.pending_deposit_token_user)?,
        pending_withdrawal_wei_hub: amount("pending_withdrawal_wei_hub", &row.pending_withdrawal_wei_hub)?,
        pending_withdrawal_wei_user: amount("pending_withdrawal_wei_user", &row.pending_withdrawal_wei_user)?,
        pending_withdrawal_token_hub: amount("pending_withdrawal_token_hub", &row.pending_withdrawal_token_hub)?,
        pending_withdrawal_token_user: amount("pending_withdrawal_token_user", &row.pending_withdrawal_token_user)?,
        tx_count_global: row.tx_count_global as u64,
        tx_count_chain: row.tx_count_chain as u64,
        thread_root: B256::from_str(&row.thread_root).map_err(|e| corrupt(row, "thread_root", e))?,
        thread_count: row.thread_count as u64,
        timeout: row.timeout as u64,
    })
}

pub fn signed_state_from_row(row: &channel_updates::Model) -> Result<SignedChannelState, HubError> {
    Ok(SignedChannelState {
        state: state_from_row(row)?,
        sig_hub: row.sig_hub.clone(),
        sig_user: row.sig_user.clone(),
    })
}

pub fn update_from_row(row: &channel_updates::Model) -> Result<ChannelUpdateRow, HubError> {
    let args: UpdateArgs = serde_json::from_str(&row.args).map_err(|e| corrupt(row, "args", e))?;
    Ok(ChannelUpdateRow {
        id: row.id,
        args,
        state: signed_state_from_row(row)?,
        invalid: row.invalid,
        onchain_tx_logical_id: row.onchain_tx_logical_id,
        created_on: row.created_on,
    })
}

/// Lock `user`'s channel row for the rest of `txn`, opening the channel on
/// first contact.
pub async fn lock_channel(
    txn: &LedgerTxn,
    contract: Address,
    user: Address,
) -> Result<channels::Model, HubError> {
    let now = Utc::now();
    let channel = channels::ActiveModel {
        user_address: Set(address_key(user)),
        contract_address: Set(address_key(contract)),
        status: Set(ChannelStatus::Open.as_str().to_string()),
        created_on: Set(now),
        updated_on: Set(now),
        ..Default::default()
    };
    Channels::insert(channel)
        .on_conflict(
            OnConflict::column(channels::Column::UserAddress)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(txn.conn())
        .await?;

    Channels::find()
        .filter(channels::Column::UserAddress.eq(address_key(user)))
        .lock_exclusive()
        .one(txn.conn())
        .await?
        .ok_or_else(|| HubError::fatal(format!("Channel row for {} vanished", user)))
}

pub async fn find_channel<C: ConnectionTrait>(
    db: &C,
    user: Address,
) -> Result<Option<channels::Model>, HubError> {
    Ok(Channels::find()
        .filter(channels::Column::UserAddress.eq(address_key(user)))
        .one(db)
        .await?)
}

pub async fn set_channel_status<C: ConnectionTrait>(
    db: &C,
    channel_id: i32,
    status: ChannelStatus,
) -> Result<(), HubError> {
    Channels::update_many()
        .col_expr(channels::Column::Status, Expr::value(status.as_str()))
        .col_expr(channels::Column::UpdatedOn, Expr::value(Utc::now()))
        .filter(channels::Column::Id.eq(channel_id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn channels_with_status<C: ConnectionTrait>(
    db: &C,
    status: ChannelStatus,
) -> Result<Vec<channels::Model>, HubError> {
    Ok(Channels::find()
        .filter(channels::Column::Status.eq(status.as_str()))
        .order_by_asc(channels::Column::Id)
        .all(db)
        .await?)
}

/// Open channels with any update since `since`
pub async fn open_channels_active_since<C: ConnectionTrait>(
    db: &C,
    since: DateTime<Utc>,
) -> Result<Vec<channels::Model>, HubError> {
    Ok(Channels::find()
        .filter(channels::Column::Status.eq(ChannelStatus::Open.as_str()))
        .filter(channels::Column::UpdatedOn.gte(since))
        .order_by_asc(channels::Column::Id)
        .all(db)
        .await?)
}

pub async fn latest_update<C: ConnectionTrait>(
    db: &C,
    user: Address,
) -> Result<Option<channel_updates::Model>, HubError> {
    Ok(ChannelUpdates::find()
        .filter(channel_updates::Column::UserAddress.eq(address_key(user)))
        .order_by_desc(channel_updates::Column::TxCountGlobal)
        .one(db)
        .await?)
}

/// Latest state, or the empty state of a channel without updates
pub async fn latest_state<C: ConnectionTrait>(
    db: &C,
    contract: Address,
    user: Address,
) -> Result<SignedChannelState, HubError> {
    match latest_update(db, user).await? {
        Some(row) => signed_state_from_row(&row),
        None => Ok(SignedChannelState {
            state: ChannelState::empty(contract, user),
            sig_hub: None,
            sig_user: None,
        }),
    }
}

pub async fn update_at<C: ConnectionTrait>(
    db: &C,
    user: Address,
    tx_count: u64,
) -> Result<Option<channel_updates::Model>, HubError> {
    Ok(ChannelUpdates::find()
        .filter(channel_updates::Column::UserAddress.eq(address_key(user)))
        .filter(channel_updates::Column::TxCountGlobal.eq(tx_count as i64))
        .one(db)
        .await?)
}

/// Updates with `from <= txCountGlobal <= to`, oldest first
pub async fn updates_in_range<C: ConnectionTrait>(
    db: &C,
    user: Address,
    from: u64,
    to: u64,
) -> Result<Vec<channel_updates::Model>, HubError> {
    Ok(ChannelUpdates::find()
        .filter(channel_updates::Column::UserAddress.eq(address_key(user)))
        .filter(channel_updates::Column::TxCountGlobal.gte(from as i64))
        .filter(channel_updates::Column::TxCountGlobal.lte(to as i64))
        .order_by_asc(channel_updates::Column::TxCountGlobal)
        .all(db)
        .await?)
}

/// Updates after `tx_count`, oldest first
pub async fn updates_since<C: ConnectionTrait>(
    db: &C,
    user: Address,
    tx_count: u64,
) -> Result<Vec<ChannelUpdateRow>, HubError> {
    let rows = ChannelUpdates::find()
        .filter(channel_updates::Column::UserAddress.eq(address_key(user)))
        .filter(channel_updates::Column::TxCountGlobal.gt(tx_count as i64))
        .order_by_asc(channel_updates::Column::TxCountGlobal)
        .all(db)
        .await?;
    rows.iter().map(update_from_row).collect()
}

pub async fn find_by_onchain_tx<C: ConnectionTrait>(
    db: &C,
    logical_id: i32,
) -> Result<Option<channel_updates::Model>, HubError> {
    Ok(ChannelUpdates::find()
        .filter(channel_updates::Column::OnchainTxLogicalId.eq(logical_id))
        .one(db)
        .await?)
}

pub async fn mark_invalid(
    txn: &LedgerTxn,
    user: Address,
    from: u64,
    to: u64,
) -> Result<u64, HubError> {
    let result = ChannelUpdates::update_many()
        .col_expr(channel_updates::Column::Invalid, Expr::value(true))
        .filter(channel_updates::Column::UserAddress.eq(address_key(user)))
        .filter(channel_updates::Column::TxCountGlobal.gte(from as i64))
        .filter(channel_updates::Column::TxCountGlobal.lte(to as i64))
        .exec(txn.conn())
        .await?;
    Ok(result.rows_affected)
}

/// Append an update to `channel`'s history
pub async fn insert_update(
    txn: &LedgerTxn,
    channel: &channels::Model,
    args: &UpdateArgs,
    signed: &SignedChannelState,
    onchain_tx_logical_id: Option<i32>,
) -> Result<ChannelUpdateRow, HubError> {
    let state = &signed.state;
    let now = Utc::now();
    let model = channel_updates::ActiveModel {
        channel_id: Set(channel.id),
        user_address: Set(address_key(state.user)),
        reason: Set(args.reason().as_str().to_string()),
        args: Set(serde_json::to_string(args)?),
        contract_address: Set(address_key(state.contract_address)),
        recipient: Set(address_key(state.recipient)),
        balance_wei_hub: Set(state.balance_wei_hub.to_string()),
        balance_wei_user: Set(state.balance_wei_user.to_string()),
        balance_token_hub: Set(state.balance_token_hub.to_string()),
        balance_token_user: Set(state.balance_token_user.to_string()),
        pending_deposit_wei_hub: Set(state.pending_deposit_wei_hub.to_string()),
        pending_deposit_wei_user: Set(state.pending_deposit_wei_user.to_string()),
        pending_deposit_token_hub: Set(state.pending_deposit_token_hub.to_string()),
        pending_deposit_token_user: Set(state.pending_deposit_token_user.to_string()),
        pending_withdrawal_wei_hub: Set(state.pending_withdrawal_wei_hub.to_string()),
        pending_withdrawal_wei_user: Set(state.pending_withdrawal_wei_user.to_string()),
        pending_withdrawal_token_hub: Set(state.pending_withdrawal_token_hub.to_string()),
        pending_withdrawal_token_user: Set(state.pending_withdrawal_token_user.to_string()),
        tx_count_global: Set(state.tx_count_global as i64),
        tx_count_chain: Set(state.tx_count_chain as i64),
        thread_root: Set(format!("{:#x}", state.thread_root)),
        thread_count: Set(state.thread_count as i64),
        timeout: Set(state.timeout as i64),
        sig_hub: Set(signed.sig_hub.clone()),
        sig_user: Set(signed.sig_user.clone()),
        invalid: Set(false),
        onchain_tx_logical_id: Set(onchain_tx_logical_id),
        created_on: Set(now),
        ..Default::default()
    };
    let saved = model.insert(txn.conn()).await?;

    Channels::update_many()
        .col_expr(channels::Column::UpdatedOn, Expr::value(now))
        .filter(channels::Column::Id.eq(channel.id))
        .exec(txn.conn())
        .await?;

    update_from_row(&saved)
}
