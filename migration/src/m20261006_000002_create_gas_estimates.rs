//! Migration to create the gas_estimates table
//!
//! Tiers are stored in gwei as decimal strings.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GasEstimates::Table)
                    .if_not_exists()
                    .col(pk_auto(GasEstimates::Id))
                    .col(timestamp_with_time_zone(GasEstimates::RetrievedAt))
                    .col(string(GasEstimates::Fast))
                    .col(string(GasEstimates::Average))
                    .col(string(GasEstimates::SafeLow))
                    .col(big_integer_null(GasEstimates::BlockNum))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GasEstimates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum GasEstimates {
    Table,
    Id,
    RetrievedAt,
    Fast,
    Average,
    SafeLow,
    BlockNum,
}
