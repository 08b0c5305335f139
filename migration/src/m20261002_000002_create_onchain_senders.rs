//! Migration to create the onchain_senders table
//!
//! Holds one row per sending account; nonce assignment locks it.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OnchainSenders::Table)
                    .if_not_exists()
                    .col(string(OnchainSenders::Address).primary_key())
                    .col(timestamp_with_time_zone(OnchainSenders::CreatedOn).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OnchainSenders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OnchainSenders {
    Table,
    Address,
    CreatedOn,
}
