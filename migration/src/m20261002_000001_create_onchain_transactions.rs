//! Migration to create the onchain_transactions table
//!
//! One row per logical transaction. Rows are never deleted; `id` is the
//! logical id other tables reference.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OnchainTransactions::Table)
                    .if_not_exists()
                    .col(pk_auto(OnchainTransactions::Id))
                    .col(string(OnchainTransactions::State))
                    .col(string(OnchainTransactions::FromAddress))
                    .col(string(OnchainTransactions::ToAddress))
                    .col(string(OnchainTransactions::Value))
                    .col(big_integer(OnchainTransactions::Gas))
                    .col(string(OnchainTransactions::GasPrice))
                    .col(text(OnchainTransactions::Data))
                    .col(big_integer(OnchainTransactions::Nonce))
                    .col(text(OnchainTransactions::SignedRaw))
                    .col(string(OnchainTransactions::Hash))
                    .col(text(OnchainTransactions::Meta))
                    .col(timestamp_with_time_zone(OnchainTransactions::CreatedOn).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone_null(OnchainTransactions::SubmittedOn))
                    .col(timestamp_with_time_zone_null(OnchainTransactions::LastBroadcastOn))
                    .col(timestamp_with_time_zone_null(OnchainTransactions::ConfirmedOn))
                    .col(timestamp_with_time_zone_null(OnchainTransactions::PendingFailureOn))
                    .col(timestamp_with_time_zone_null(OnchainTransactions::FailedOn))
                    .col(text_null(OnchainTransactions::FailedReason))
                    .col(big_integer_null(OnchainTransactions::BlockNum))
                    .col(string_null(OnchainTransactions::BlockHash))
                    .col(big_integer_null(OnchainTransactions::TransactionIndex))
                    .to_owned(),
            )
            .await?;

        // Poller scans non-terminal rows
        manager
            .create_index(
                Index::create()
                    .name("idx_onchain_transactions_state")
                    .table(OnchainTransactions::Table)
                    .col(OnchainTransactions::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_onchain_transactions_from_nonce")
                    .table(OnchainTransactions::Table)
                    .col(OnchainTransactions::FromAddress)
                    .col(OnchainTransactions::Nonce)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OnchainTransactions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OnchainTransactions {
    Table,
    Id,
    State,
    FromAddress,
    ToAddress,
    Value,
    Gas,
    GasPrice,
    Data,
    Nonce,
    SignedRaw,
    Hash,
    Meta,
    CreatedOn,
    SubmittedOn,
    LastBroadcastOn,
    ConfirmedOn,
    PendingFailureOn,
    FailedOn,
    FailedReason,
    BlockNum,
    BlockHash,
    TransactionIndex,
}
