//! `SeaORM` Entity prelude

pub use super::channel_disputes::Entity as ChannelDisputes;
pub use super::channel_updates::Entity as ChannelUpdates;
pub use super::channels::Entity as Channels;
pub use super::exchange_rates::Entity as ExchangeRates;
pub use super::gas_estimates::Entity as GasEstimates;
pub use super::onchain_senders::Entity as OnchainSenders;
pub use super::onchain_transactions::Entity as OnchainTransactions;
