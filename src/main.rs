use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payment_hub::config::{ConnectionConfig, HubConfig};
use payment_hub::jobs::{
    collateral_sync::start_collateral_sync_job, dispute_close_watcher::start_dispute_close_watcher,
    gas_price_sync::start_gas_price_sync_job,
    onchain_transaction_poller::start_onchain_transaction_poller,
};
use payment_hub::ledger::Ledger;
use payment_hub::services::callbacks::{CallbackRegistry, CompletionCallback, CompletionHandler};
use payment_hub::services::chain_client::{AlloyChainClient, ChainClient};
use payment_hub::services::channels::ChannelsService;
use payment_hub::services::collateralization::CollateralizationPolicy;
use payment_hub::services::disputes::DisputesService;
use payment_hub::services::onchain_transactions::OnchainTransactionManager;
use payment_hub::services::pending_update_cache::PendingUpdateCache;
use payment_hub::services::signer::HubSigner;
use payment_hub::services::threads::{ThreadService, ThreadsDisabled};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,payment_hub=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let connection = ConnectionConfig::from_env().expect("Missing connection settings");
    let config = HubConfig::from_env().expect("Invalid hub configuration");

    // Connect to database
    tracing::info!("Connecting to database...");
    let mut options = ConnectOptions::new(connection.database_url.clone());
    options.sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let ledger = Ledger::new(db);

    let chain: Arc<dyn ChainClient> = Arc::new(
        AlloyChainClient::new(&connection.eth_rpc_url)
            .await
            .expect("Failed to connect to chain RPC"),
    );
    let signer = Arc::new(
        HubSigner::from_private_key(&connection.hub_private_key).expect("Invalid HUB_PRIVATE_KEY"),
    );
    tracing::info!(
        hub = %signer.address(),
        contract = %config.channel_manager_address,
        "Hub identity loaded"
    );

    let registry = Arc::new(CallbackRegistry::new());
    let transactions = Arc::new(OnchainTransactionManager::new(
        ledger.clone(),
        chain.clone(),
        signer.clone(),
        registry.clone(),
        config.onchain.clone(),
    ));

    let threads: Arc<dyn ThreadService> = Arc::new(ThreadsDisabled);
    let collateral = Arc::new(CollateralizationPolicy::new(
        config.collateral.clone(),
        threads.clone(),
    ));

    let channels = Arc::new(ChannelsService::new(
        ledger.clone(),
        config.clone(),
        signer.clone(),
        chain.clone(),
        transactions.clone(),
        PendingUpdateCache::new(config.pending_update_ttl),
        collateral,
        threads,
    ));
    let disputes = Arc::new(DisputesService::new(
        ledger.clone(),
        config.clone(),
        signer.clone(),
        chain.clone(),
        transactions.clone(),
    ));

    // Completion callbacks must resolve before any transaction is submitted
    let channels_handler: Arc<dyn CompletionHandler> = channels.clone();
    let disputes_handler: Arc<dyn CompletionHandler> = disputes.clone();
    registry.register(CompletionCallback::HubAuthorizedUpdate, &channels_handler);
    registry.register(CompletionCallback::StartExit, &disputes_handler);
    registry.register(CompletionCallback::EmptyChannel, &disputes_handler);

    start_gas_price_sync_job(ledger.clone(), chain.clone(), config.gas_poll_interval).await;
    start_onchain_transaction_poller(transactions.clone(), config.tx_poll_interval).await;
    start_dispute_close_watcher(disputes.clone(), config.dispute_poll_interval).await;
    start_collateral_sync_job(
        ledger.clone(),
        channels.clone(),
        config.collateral_poll_interval,
        config.collateral.recent_payments_window,
    )
    .await;

    tracing::info!("Payment hub running");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");

    tracing::info!("Shutdown signal received, stopping payment hub");
}
