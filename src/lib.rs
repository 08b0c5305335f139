// src/lib.rs

pub mod entities {
    pub mod prelude;
    pub mod channels;
    pub mod channel_updates;
    pub mod channel_disputes;
    pub mod onchain_transactions;
    pub mod onchain_senders;
    pub mod exchange_rates;
    pub mod gas_estimates;
}

pub mod models {
    pub mod channel;
    pub mod update;
    pub mod onchain_transaction;
    pub mod dispute;
}

pub mod services {
    pub mod amounts;
    pub mod signer;
    pub mod state_generator;
    pub mod chain_client;
    pub mod rpc_errors;
    pub mod callbacks;
    pub mod pending_update_cache;
    pub mod exchange_rates;
    pub mod gas_estimates;
    pub mod onchain_transactions;
    pub mod collateralization;
    pub mod channel_ledger;
    pub mod channels;
    pub mod threads;
    pub mod disputes;
}

pub mod jobs {
    pub mod onchain_transaction_poller;
    pub mod dispute_close_watcher;
    pub mod gas_price_sync;
    pub mod collateral_sync;
}

pub mod config;
pub mod error;
pub mod ledger;
