//! Migration to create the channels table
//!
//! One row per user. The row is the lock target that serializes state
//! updates for that user.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Channels::Table)
                    .if_not_exists()
                    .col(pk_auto(Channels::Id))
                    .col(string(Channels::UserAddress))
                    .col(string(Channels::ContractAddress))
                    .col(string(Channels::Status))
                    .col(timestamp_with_time_zone(Channels::CreatedOn).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Channels::UpdatedOn).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channels_user_address")
                    .table(Channels::Table)
                    .col(Channels::UserAddress)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Dispute watcher scans by status
        manager
            .create_index(
                Index::create()
                    .name("idx_channels_status")
                    .table(Channels::Table)
                    .col(Channels::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Channels::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Channels {
    Table,
    Id,
    UserAddress,
    ContractAddress,
    Status,
    CreatedOn,
    UpdatedOn,
}
