//! Migration to create the channel_disputes table

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChannelDisputes::Table)
                    .if_not_exists()
                    .col(pk_auto(ChannelDisputes::Id))
                    .col(integer(ChannelDisputes::ChannelId))
                    .col(timestamp_with_time_zone(ChannelDisputes::StartedOn).default(Expr::current_timestamp()))
                    .col(text(ChannelDisputes::Reason))
                    .col(string(ChannelDisputes::Status))
                    .col(integer_null(ChannelDisputes::OnchainTxIdStart))
                    .col(integer_null(ChannelDisputes::OnchainTxIdEmpty))
                    .col(big_integer_null(ChannelDisputes::DisputePeriodEnds))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channel_disputes_channel_id")
                    .table(ChannelDisputes::Table)
                    .col(ChannelDisputes::ChannelId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChannelDisputes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChannelDisputes {
    Table,
    Id,
    ChannelId,
    StartedOn,
    Reason,
    Status,
    OnchainTxIdStart,
    OnchainTxIdEmpty,
    DisputePeriodEnds,
}
