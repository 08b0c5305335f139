//! `SeaORM` Entity for onchain_transactions table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "onchain_transactions")]
pub struct Model {
    /// Logical id, stable across rebroadcasts
    #[sea_orm(primary_key)]
    pub id: i32,
    /// new, submitted, pending_failure, confirmed, failed
    pub state: String,
    pub from_address: String,
    pub to_address: String,
    /// Wei value as decimal string
    pub value: String,
    pub gas: i64,
    /// Wei per gas as decimal string
    pub gas_price: String,
    /// Calldata, 0x hex
    #[sea_orm(column_type = "Text")]
    pub data: String,
    pub nonce: i64,
    /// EIP-2718 encoded signed transaction, 0x hex
    #[sea_orm(column_type = "Text")]
    pub signed_raw: String,
    pub hash: String,
    /// `TransactionMeta` as JSON text
    #[sea_orm(column_type = "Text")]
    pub meta: String,
    pub created_on: DateTimeUtc,
    pub submitted_on: Option<DateTimeUtc>,
    pub last_broadcast_on: Option<DateTimeUtc>,
    pub confirmed_on: Option<DateTimeUtc>,
    pub pending_failure_on: Option<DateTimeUtc>,
    pub failed_on: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub failed_reason: Option<String>,
    pub block_num: Option<i64>,
    pub block_hash: Option<String>,
    pub transaction_index: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
