pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_channels;
mod m20261001_000002_create_channel_updates;
mod m20261002_000001_create_onchain_transactions;
mod m20261002_000002_create_onchain_senders;
mod m20261005_000001_create_channel_disputes;
mod m20261006_000001_create_exchange_rates;
mod m20261006_000002_create_gas_estimates;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_channels::Migration),
            Box::new(m20261001_000002_create_channel_updates::Migration),
            Box::new(m20261002_000001_create_onchain_transactions::Migration),
            Box::new(m20261002_000002_create_onchain_senders::Migration),
            Box::new(m20261005_000001_create_channel_disputes::Migration),
            Box::new(m20261006_000001_create_exchange_rates::Migration),
            Box::new(m20261006_000002_create_gas_estimates::Migration),
        ]
    }
}
