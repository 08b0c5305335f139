//! Migration to create the exchange_rates table
//!
//! Rows are written by the external rate poller; the hub only reads the latest.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExchangeRates::Table)
                    .if_not_exists()
                    .col(pk_auto(ExchangeRates::Id))
                    .col(timestamp_with_time_zone(ExchangeRates::RetrievedAt))
                    .col(string(ExchangeRates::RateUsd))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_exchange_rates_retrieved_at")
                    .table(ExchangeRates::Table)
                    .col(ExchangeRates::RetrievedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExchangeRates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ExchangeRates {
    Table,
    Id,
    RetrievedAt,
    RateUsd,
}
