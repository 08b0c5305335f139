//! Migration to create the channel_updates table
//!
//! Append-only history of channel states. Monetary columns are decimal
//! strings so that 256-bit values survive every backend.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChannelUpdates::Table)
                    .if_not_exists()
                    .col(pk_auto(ChannelUpdates::Id))
                    .col(integer(ChannelUpdates::ChannelId))
                    .col(string(ChannelUpdates::UserAddress))
                    .col(string(ChannelUpdates::Reason))
                    .col(text(ChannelUpdates::Args))
                    .col(string(ChannelUpdates::ContractAddress))
                    .col(string(ChannelUpdates::Recipient))
                    .col(string(ChannelUpdates::BalanceWeiHub))
                    .col(string(ChannelUpdates::BalanceWeiUser))
                    .col(string(ChannelUpdates::BalanceTokenHub))
                    .col(string(ChannelUpdates::BalanceTokenUser))
                    .col(string(ChannelUpdates::PendingDepositWeiHub))
                    .col(string(ChannelUpdates::PendingDepositWeiUser))
                    .col(string(ChannelUpdates::PendingDepositTokenHub))
                    .col(string(ChannelUpdates::PendingDepositTokenUser))
                    .col(string(ChannelUpdates::PendingWithdrawalWeiHub))
                    .col(string(ChannelUpdates::PendingWithdrawalWeiUser))
                    .col(string(ChannelUpdates::PendingWithdrawalTokenHub))
                    .col(string(ChannelUpdates::PendingWithdrawalTokenUser))
                    .col(big_integer(ChannelUpdates::TxCountGlobal))
                    .col(big_integer(ChannelUpdates::TxCountChain))
                    .col(string(ChannelUpdates::ThreadRoot))
                    .col(big_integer(ChannelUpdates::ThreadCount))
                    .col(big_integer(ChannelUpdates::Timeout))
                    .col(string_null(ChannelUpdates::SigHub))
                    .col(string_null(ChannelUpdates::SigUser))
                    .col(boolean(ChannelUpdates::Invalid).default(false))
                    .col(integer_null(ChannelUpdates::OnchainTxLogicalId))
                    .col(timestamp_with_time_zone(ChannelUpdates::CreatedOn).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        // txCountGlobal is unique per user
        manager
            .create_index(
                Index::create()
                    .name("idx_channel_updates_user_tx_count")
                    .table(ChannelUpdates::Table)
                    .col(ChannelUpdates::UserAddress)
                    .col(ChannelUpdates::TxCountGlobal)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channel_updates_onchain_tx")
                    .table(ChannelUpdates::Table)
                    .col(ChannelUpdates::OnchainTxLogicalId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChannelUpdates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChannelUpdates {
    Table,
    Id,
    ChannelId,
    UserAddress,
    Reason,
    Args,
    ContractAddress,
    Recipient,
    BalanceWeiHub,
    BalanceWeiUser,
    BalanceTokenHub,
    BalanceTokenUser,
    PendingDepositWeiHub,
    PendingDepositWeiUser,
    PendingDepositTokenHub,
    PendingDepositTokenUser,
    PendingWithdrawalWeiHub,
    PendingWithdrawalWeiUser,
    PendingWithdrawalTokenHub,
    PendingWithdrawalTokenUser,
    TxCountGlobal,
    TxCountChain,
    ThreadRoot,
    ThreadCount,
    Timeout,
    SigHub,
    SigUser,
    Invalid,
    OnchainTxLogicalId,
    CreatedOn,
}
