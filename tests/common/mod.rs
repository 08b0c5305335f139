#![allow(dead_code)]

use alloy::primitives::{keccak256, Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, Set,
};
use sea_orm_migration::MigratorTrait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;

use payment_hub::config::HubConfig;
use payment_hub::entities::{exchange_rates, onchain_transactions};
use payment_hub::ledger::Ledger;
use payment_hub::services::callbacks::{CallbackRegistry, CompletionCallback, CompletionHandler};
use payment_hub::services::chain_client::{
    ChainChannelDetails, ChainClient, ChainError, ChainReceipt, ChainTransaction,
};
use payment_hub::services::channels::ChannelsService;
use payment_hub::services::collateralization::CollateralizationPolicy;
use payment_hub::services::disputes::DisputesService;
use payment_hub::services::gas_estimates::{self, GasTiers};
use payment_hub::services::onchain_transactions::OnchainTransactionManager;
use payment_hub::services::pending_update_cache::PendingUpdateCache;
use payment_hub::services::signer::HubSigner;
use payment_hub::services::threads::{ThreadService, ThreadsDisabled};

/// Well-known dev keys, never funded anywhere real
pub const HUB_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const USER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub const CHAIN_START: u64 = 1_700_000_000;

/// One token (or one ETH) in base units
pub fn eth(n: u64) -> alloy::primitives::U256 {
    alloy::primitives::U256::from(n) * alloy::primitives::U256::from(1_000_000_000_000_000_000u64)
}

pub fn contract_address() -> Address {
    Address::repeat_byte(0xcc)
}

/// Set up an in-memory SQLite ledger with all migrations applied.
/// A single pooled connection keeps every query on the same database.
pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

#[derive(Debug)]
pub struct MockChainState {
    pub chain_id: u64,
    pub nonces: HashMap<Address, u64>,
    /// Errors returned by the next broadcasts, in order
    pub send_errors: VecDeque<String>,
    pub sent: Vec<Bytes>,
    /// Hashes the node reports as known
    pub visible: HashSet<B256>,
    /// Accepted broadcasts become visible
    pub visible_on_send: bool,
    pub receipts: HashMap<B256, ChainReceipt>,
    pub block_timestamp: u64,
    pub gas_price: u128,
    pub gas_estimate: u64,
    pub challenge_period: u64,
    pub channel_details: HashMap<Address, ChainChannelDetails>,
}

impl Default for MockChainState {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            nonces: HashMap::new(),
            send_errors: VecDeque::new(),
            sent: Vec::new(),
            visible: HashSet::new(),
            visible_on_send: true,
            receipts: HashMap::new(),
            block_timestamp: CHAIN_START,
            gas_price: 20_000_000_000,
            gas_estimate: 100_000,
            challenge_period: 3_600,
            channel_details: HashMap::new(),
        }
    }
}

/// Scripted node
#[derive(Default)]
pub struct MockChainClient {
    pub state: Mutex<MockChainState>,
}

impl MockChainClient {
    pub fn fail_next_send(&self, message: &str) {
        self.state.lock().send_errors.push_back(message.to_string());
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().nonces.insert(address, nonce);
    }

    pub fn set_block_timestamp(&self, timestamp: u64) {
        self.state.lock().block_timestamp = timestamp;
    }

    pub fn mine(&self, hash: B256, status: bool) {
        let mut state = self.state.lock();
        state.visible.insert(hash);
        state.receipts.insert(
            hash,
            ChainReceipt {
                status,
                block_number: Some(100),
                block_hash: Some(B256::repeat_byte(0xbb)),
                transaction_index: Some(0),
            },
        );
    }

    pub fn forget(&self, hash: B256) {
        self.state.lock().visible.remove(&hash);
    }

    pub fn set_visible(&self, hash: B256) {
        self.state.lock().visible.insert(hash);
    }

    pub fn set_channel_details(&self, user: Address, channel_closing_time: u64, status: u8) {
        self.state.lock().channel_details.insert(
            user,
            ChainChannelDetails {
                channel_closing_time,
                status,
            },
        );
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().chain_id)
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        Ok(self.state.lock().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn estimate_gas(&self, _request: &TransactionRequest) -> Result<u64, ChainError> {
        Ok(self.state.lock().gas_estimate)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
        let mut state = self.state.lock();
        state.sent.push(raw.clone());
        if let Some(message) = state.send_errors.pop_front() {
            return Err(ChainError::new(message));
        }
        let hash = keccak256(raw);
        if state.visible_on_send {
            state.visible.insert(hash);
        }
        Ok(hash)
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<ChainTransaction>, ChainError> {
        let state = self.state.lock();
        if !state.visible.contains(&hash) {
            return Ok(None);
        }
        let block_number = state.receipts.get(&hash).and_then(|r| r.block_number);
        Ok(Some(ChainTransaction { hash, block_number }))
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<ChainReceipt>, ChainError> {
        Ok(self.state.lock().receipts.get(&hash).cloned())
    }

    async fn latest_block_timestamp(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().block_timestamp)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.state.lock().gas_price)
    }

    async fn challenge_period(&self, _contract: Address) -> Result<u64, ChainError> {
        Ok(self.state.lock().challenge_period)
    }

    async fn channel_details(
        &self,
        _contract: Address,
        user: Address,
    ) -> Result<ChainChannelDetails, ChainError> {
        self.state
            .lock()
            .channel_details
            .get(&user)
            .cloned()
            .ok_or_else(|| ChainError::new(format!("no channel for {}", user)))
    }
}

/// Fully wired hub over a mock chain
pub struct TestHub {
    pub ledger: Ledger,
    pub chain: Arc<MockChainClient>,
    pub signer: Arc<HubSigner>,
    pub user: HubSigner,
    pub config: HubConfig,
    pub transactions: Arc<OnchainTransactionManager>,
    pub channels: Arc<ChannelsService>,
    pub disputes: Arc<DisputesService>,
    pub registry: Arc<CallbackRegistry>,
}

impl TestHub {
    /// Polling is driven by the test unless `poll_after_commit` is set
    pub async fn new() -> Self {
        Self::with_poll_after_commit(false).await
    }

    pub async fn with_poll_after_commit(poll_after_commit: bool) -> Self {
        let mut config = HubConfig::new(contract_address());
        config.onchain.poll_after_commit = poll_after_commit;
        Self::with_config(config).await
    }

    pub async fn with_config(config: HubConfig) -> Self {
        let db = setup_test_db().await.expect("Failed to set up test DB");
        let ledger = Ledger::new(db);
        let chain = Arc::new(MockChainClient::default());
        let chain_client: Arc<dyn ChainClient> = chain.clone();
        let signer = Arc::new(HubSigner::from_private_key(HUB_KEY).expect("hub key"));
        let user = HubSigner::from_private_key(USER_KEY).expect("user key");

        let registry = Arc::new(CallbackRegistry::new());
        let transactions = Arc::new(OnchainTransactionManager::new(
            ledger.clone(),
            chain_client.clone(),
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
            chain_client.clone(),
            transactions.clone(),
            PendingUpdateCache::new(config.pending_update_ttl),
            collateral,
            threads,
        ));
        let disputes = Arc::new(DisputesService::new(
            ledger.clone(),
            config.clone(),
            signer.clone(),
            chain_client,
            transactions.clone(),
        ));

        let channels_handler: Arc<dyn CompletionHandler> = channels.clone();
        let disputes_handler: Arc<dyn CompletionHandler> = disputes.clone();
        registry.register(CompletionCallback::HubAuthorizedUpdate, &channels_handler);
        registry.register(CompletionCallback::StartExit, &disputes_handler);
        registry.register(CompletionCallback::EmptyChannel, &disputes_handler);

        insert_gas_estimate(&ledger).await;

        Self {
            ledger,
            chain,
            signer,
            user,
            config,
            transactions,
            channels,
            disputes,
            registry,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.ledger.connection()
    }

    pub fn user_address(&self) -> Address {
        self.user.address()
    }

    pub async fn transaction(&self, logical_id: i32) -> onchain_transactions::Model {
        self.transactions
            .find(logical_id)
            .await
            .expect("query transaction")
            .expect("transaction exists")
    }
}

pub fn tx_hash(tx: &onchain_transactions::Model) -> B256 {
    B256::from_str(&tx.hash).expect("stored hash")
}

pub async fn insert_gas_estimate(ledger: &Ledger) {
    gas_estimates::record_estimate(
        ledger.connection(),
        GasTiers::from_node_price(20_000_000_000),
        Some(1),
    )
    .await
    .expect("insert gas estimate");
}

/// Record `rate` as retrieved `age` ago
pub async fn insert_rate(ledger: &Ledger, rate: Decimal, age: Duration) {
    exchange_rates::ActiveModel {
        retrieved_at: Set(Utc::now() - age),
        rate_usd: Set(rate.to_string()),
        ..Default::default()
    }
    .insert(ledger.connection())
    .await
    .expect("insert exchange rate");
}

/// Push every broadcast and state timestamp of `logical_id` back by `age`
pub async fn backdate_transaction(ledger: &Ledger, logical_id: i32, age: Duration) {
    let tx = onchain_transactions::Entity::find_by_id(logical_id)
        .one(ledger.connection())
        .await
        .expect("query transaction")
        .expect("transaction exists");

    let shift = |at: Option<chrono::DateTime<Utc>>| at.map(|at| at - age);
    onchain_transactions::Entity::update_many()
        .col_expr(
            onchain_transactions::Column::SubmittedOn,
            Expr::value(shift(tx.submitted_on)),
        )
        .col_expr(
            onchain_transactions::Column::LastBroadcastOn,
            Expr::value(shift(tx.last_broadcast_on)),
        )
        .col_expr(
            onchain_transactions::Column::PendingFailureOn,
            Expr::value(shift(tx.pending_failure_on)),
        )
        .filter(onchain_transactions::Column::Id.eq(logical_id))
        .exec(ledger.connection())
        .await
        .expect("backdate transaction");
}
