//! `SeaORM` Entity for channels table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// User address, lowercase 0x hex
    #[sea_orm(unique)]
    pub user_address: String,
    /// Channel manager contract address
    pub contract_address: String,
    /// CS_OPEN or CS_CHANNEL_DISPUTE
    pub status: String,
    pub created_on: DateTimeUtc,
    pub updated_on: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
