//! `SeaORM` Entity for channel_updates table
//!
//! Each row is one channel state plus the reason it was produced.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "channel_updates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub channel_id: i32,
    pub user_address: String,
    /// Update reason tag (Payment, Exchange, ...)
    pub reason: String,
    /// Reason-specific arguments as JSON text
    #[sea_orm(column_type = "Text")]
    pub args: String,
    pub contract_address: String,
    pub recipient: String,
    pub balance_wei_hub: String,
    pub balance_wei_user: String,
    pub balance_token_hub: String,
    pub balance_token_user: String,
    pub pending_deposit_wei_hub: String,
    pub pending_deposit_wei_user: String,
    pub pending_deposit_token_hub: String,
    pub pending_deposit_token_user: String,
    pub pending_withdrawal_wei_hub: String,
    pub pending_withdrawal_wei_user: String,
    pub pending_withdrawal_token_hub: String,
    pub pending_withdrawal_token_user: String,
    pub tx_count_global: i64,
    pub tx_count_chain: i64,
    pub thread_root: String,
    pub thread_count: i64,
    pub timeout: i64,
    pub sig_hub: Option<String>,
    pub sig_user: Option<String>,
    /// Set once a later Invalidation superseded this update
    pub invalid: bool,
    /// Weak reference to onchain_transactions.id
    pub onchain_tx_logical_id: Option<i32>,
    pub created_on: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
