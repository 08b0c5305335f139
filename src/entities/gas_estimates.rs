//! `SeaORM` Entity for gas_estimates table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "gas_estimates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub retrieved_at: DateTimeUtc,
    /// Gwei, decimal string
    pub fast: String,
    pub average: String,
    pub safe_low: String,
    pub block_num: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
