//! `SeaORM` Entity for channel_disputes table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "channel_disputes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub channel_id: i32,
    pub started_on: DateTimeUtc,
    #[sea_orm(column_type = "Text")]
    pub reason: String,
    /// CD_PENDING, CD_IN_DISPUTE_PERIOD, CD_FINISHED, CD_FAILED
    pub status: String,
    /// Weak reference to the startExit transaction
    pub onchain_tx_id_start: Option<i32>,
    /// Weak reference to the emptyChannel transaction
    pub onchain_tx_id_empty: Option<i32>,
    /// Unix seconds (chain time)
    pub dispute_period_ends: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
