//! Onchain transaction manager
//!
//! Owns every transaction the hub sends: nonce assignment, signing,
//! broadcast, confirmation polling and the retry/failure state machine.
//! Rows are created `new` inside the caller's ledger transaction and
//! broadcast only after that transaction commits.

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, Bytes, B256, U256},
    rpc::types::TransactionRequest,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::OnchainTransactionConfig;
use crate::entities::{onchain_senders, onchain_transactions};
use crate::entities::prelude::{OnchainSenders, OnchainTransactions};
use crate::error::HubError;
use crate::ledger::{address_key, Ledger, LedgerTxn};
use crate::models::onchain_transaction::{TransactionMeta, TransactionState};
use crate::services::callbacks::{CallbackRegistry, CompletionCallback};
use crate::services::chain_client::ChainClient;
use crate::services::gas_estimates;
use crate::services::rpc_errors::{classify, RpcErrorClass};
use crate::services::signer::HubSigner;

/// Gas estimates are padded by this percentage
const GAS_BUFFER_PERCENT: u64 = 120;

const EVM_REVERT: &str = "EVM revert";
const CONFIRMATION_TIMEOUT: &str = "timeout";

#[derive(Debug, Clone)]
pub struct OnchainTransactionRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    /// Gas limit; estimated when absent
    pub gas: Option<u64>,
    pub meta: TransactionMeta,
}

/// Sent once a transaction reaches a terminal state and its callback ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionCompletion {
    pub logical_id: i32,
    pub state: TransactionState,
}

/// Outcome of a single broadcast attempt
enum Broadcast {
    Accepted,
    Rejected(String),
    Retry,
}

pub struct OnchainTransactionManager {
    ledger: Ledger,
    chain: Arc<dyn ChainClient>,
    signer: Arc<HubSigner>,
    registry: Arc<CallbackRegistry>,
    config: OnchainTransactionConfig,
    poll_lock: Mutex<()>,
    completions: broadcast::Sender<TransactionCompletion>,
}

fn exceeded(since: Option<DateTime<Utc>>, bound: Duration) -> bool {
    let Some(since) = since else {
        return true;
    };
    let bound = chrono::Duration::from_std(bound).unwrap_or(chrono::Duration::MAX);
    Utc::now().signed_duration_since(since) > bound
}

impl OnchainTransactionManager {
    pub fn new(
        ledger: Ledger,
        chain: Arc<dyn ChainClient>,
        signer: Arc<HubSigner>,
        registry: Arc<CallbackRegistry>,
        config: OnchainTransactionConfig,
    ) -> Self {
        let (completions, _) = broadcast::channel(1024);
        Self {
            ledger,
            chain,
            signer,
            registry,
            config,
            poll_lock: Mutex::new(()),
            completions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionCompletion> {
        self.completions.subscribe()
    }

    /// Sign `request` and store it as `new` inside `txn`. Polling starts
    /// after `txn` commits.
    pub async fn send_transaction(
        self: &Arc<Self>,
        txn: &mut LedgerTxn,
        request: OnchainTransactionRequest,
    ) -> Result<onchain_transactions::Model, HubError> {
        if request.from != self.signer.address() {
            return Err(HubError::Config(format!(
                "Cannot sign for {}, hub key is {}",
                request.from,
                self.signer.address()
            )));
        }
        if let Some(name) = &request.meta.complete_callback {
            self.registry.validate(name)?;
        }

        let from = address_key(request.from);
        self.lock_sender(txn, &from).await?;

        let nonce = self.next_nonce(txn, request.from, &from).await?;
        let gas_price = gas_estimates::latest_fast_gas_price(txn.conn()).await?;
        let chain_id = self.chain.chain_id().await?;

        let mut tx_request = TransactionRequest::default()
            .with_from(request.from)
            .with_to(request.to)
            .with_value(request.value)
            .with_input(request.data.clone())
            .with_nonce(nonce)
            .with_gas_price(gas_price)
            .with_chain_id(chain_id);

        let gas = match request.gas {
            Some(gas) => gas,
            None => {
                let estimate = self.chain.estimate_gas(&tx_request).await?;
                estimate.saturating_mul(GAS_BUFFER_PERCENT) / 100
            }
        };
        tx_request.set_gas_limit(gas);

        let signed = self.signer.sign_transaction(tx_request).await?;

        let model = onchain_transactions::ActiveModel {
            state: Set(TransactionState::New.as_str().to_string()),
            from_address: Set(from.clone()),
            to_address: Set(address_key(request.to)),
            value: Set(request.value.to_string()),
            gas: Set(gas as i64),
            gas_price: Set(gas_price.to_string()),
            data: Set(request.data.to_string()),
            nonce: Set(nonce as i64),
            signed_raw: Set(signed.raw.to_string()),
            hash: Set(format!("{:#x}", signed.hash)),
            meta: Set(serde_json::to_string(&request.meta)?),
            created_on: Set(Utc::now()),
            ..Default::default()
        };
        let saved = model.insert(txn.conn()).await?;

        info!(
            logical_id = saved.id,
            from = %from,
            nonce = nonce,
            hash = %saved.hash,
            reason = %request.meta.reason,
            "Created onchain transaction"
        );

        if self.config.poll_after_commit {
            let manager = Arc::clone(self);
            txn.after_commit(move || async move {
                manager.spawn_poll();
            });
        }

        Ok(saved)
    }

    /// Serialize nonce assignment per sender, even before its first transaction
    async fn lock_sender(&self, txn: &LedgerTxn, from: &str) -> Result<(), HubError> {
        let sender = onchain_senders::ActiveModel {
            address: Set(from.to_string()),
            created_on: Set(Utc::now()),
        };
        OnchainSenders::insert(sender)
            .on_conflict(
                OnConflict::column(onchain_senders::Column::Address)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(txn.conn())
            .await?;

        OnchainSenders::find_by_id(from.to_string())
            .lock_exclusive()
            .one(txn.conn())
            .await?
            .ok_or_else(|| HubError::fatal(format!("Sender row for {} vanished", from)))?;
        Ok(())
    }

    /// max(chain nonce, highest live ledger nonce + 1)
    async fn next_nonce(
        &self,
        txn: &LedgerTxn,
        from: Address,
        from_key: &str,
    ) -> Result<u64, HubError> {
        let chain_nonce = self.chain.get_transaction_count(from).await?;

        let highest = OnchainTransactions::find()
            .filter(onchain_transactions::Column::FromAddress.eq(from_key))
            .filter(onchain_transactions::Column::State.ne(TransactionState::Failed.as_str()))
            .order_by_desc(onchain_transactions::Column::Nonce)
            .one(txn.conn())
            .await?;

        let ledger_nonce = highest.map(|tx| tx.nonce as u64 + 1).unwrap_or(0);
        debug!(
            from = %from_key,
            chain_nonce = chain_nonce,
            ledger_nonce = ledger_nonce,
            "Assigning nonce"
        );
        Ok(chain_nonce.max(ledger_nonce))
    }

    /// Run a poll in the background
    pub fn spawn_poll(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.poll().await {
                error!(error = %e, "Onchain transaction poll failed");
            }
        });
    }

    /// Advance every non-terminal transaction one step. Concurrent calls
    /// wait for the running poll to finish.
    pub async fn poll(&self) -> Result<(), HubError> {
        let _guard = self.poll_lock.lock().await;

        let pending = OnchainTransactions::find()
            .filter(
                onchain_transactions::Column::State
                    .is_in(TransactionState::NON_TERMINAL.map(|s| s.as_str())),
            )
            .order_by_asc(onchain_transactions::Column::Nonce)
            .order_by_asc(onchain_transactions::Column::Id)
            .all(self.ledger.connection())
            .await?;

        if !pending.is_empty() {
            debug!(count = pending.len(), "Polling onchain transactions");
        }

        for tx in pending {
            let logical_id = tx.id;
            if let Err(e) = self.process(tx).await {
                error!(logical_id = logical_id, error = %e, "Failed to process onchain transaction");
            }
        }
        Ok(())
    }

    async fn process(&self, tx: onchain_transactions::Model) -> Result<(), HubError> {
        let state = TransactionState::from_str(&tx.state).map_err(HubError::Fatal)?;
        match state {
            TransactionState::New => self.process_new(tx).await,
            TransactionState::Submitted => self.process_submitted(tx).await,
            TransactionState::PendingFailure => self.process_pending_failure(tx).await,
            TransactionState::Confirmed | TransactionState::Failed => Err(HubError::fatal(
                format!("Terminal transaction {} selected for polling", tx.id),
            )),
        }
    }

    async fn broadcast(&self, tx: &onchain_transactions::Model) -> Result<Broadcast, HubError> {
        let raw = hex::decode(tx.signed_raw.trim_start_matches("0x"))
            .map_err(|e| HubError::fatal(format!("Stored transaction {} is not hex: {}", tx.id, e)))?;

        match self.chain.send_raw_transaction(&Bytes::from(raw)).await {
            Ok(_) => Ok(Broadcast::Accepted),
            Err(e) => match classify(&e.message) {
                RpcErrorClass::AlreadyImported => {
                    debug!(logical_id = tx.id, error = %e, "Transaction already known to node");
                    Ok(Broadcast::Accepted)
                }
                RpcErrorClass::Permanent => {
                    warn!(logical_id = tx.id, error = %e, "Broadcast rejected");
                    Ok(Broadcast::Rejected(e.message))
                }
                RpcErrorClass::Temporary => {
                    warn!(logical_id = tx.id, error = %e, "Temporary broadcast error, will retry");
                    Ok(Broadcast::Retry)
                }
                RpcErrorClass::Unknown => {
                    error!(
                        logical_id = tx.id,
                        hash = %tx.hash,
                        error = %e,
                        "Unrecognized broadcast error; transaction left untouched, extend the RPC error table"
                    );
                    Ok(Broadcast::Retry)
                }
            },
        }
    }

    async fn process_new(&self, tx: onchain_transactions::Model) -> Result<(), HubError> {
        let now = Utc::now();
        match self.broadcast(&tx).await? {
            Broadcast::Accepted => {
                let changes = onchain_transactions::ActiveModel {
                    submitted_on: Set(Some(now)),
                    last_broadcast_on: Set(Some(now)),
                    ..Default::default()
                };
                self.transition(&tx, TransactionState::Submitted, changes).await?;
            }
            Broadcast::Rejected(reason) => {
                let changes = onchain_transactions::ActiveModel {
                    pending_failure_on: Set(Some(now)),
                    last_broadcast_on: Set(Some(now)),
                    failed_reason: Set(Some(reason)),
                    ..Default::default()
                };
                if let Some(updated) = self
                    .transition(&tx, TransactionState::PendingFailure, changes)
                    .await?
                {
                    self.process_pending_failure(updated).await?;
                }
            }
            Broadcast::Retry => {}
        }
        Ok(())
    }

    async fn process_submitted(&self, tx: onchain_transactions::Model) -> Result<(), HubError> {
        let hash = parse_hash(&tx)?;

        if let Some(receipt) = self.chain.get_transaction_receipt(hash).await? {
            let now = Utc::now();
            let mut changes = onchain_transactions::ActiveModel {
                block_num: Set(receipt.block_number.map(|n| n as i64)),
                block_hash: Set(receipt.block_hash.map(|h| format!("{:#x}", h))),
                transaction_index: Set(receipt.transaction_index.map(|i| i as i64)),
                ..Default::default()
            };
            let next = if receipt.status {
                changes.confirmed_on = Set(Some(now));
                TransactionState::Confirmed
            } else {
                changes.failed_on = Set(Some(now));
                changes.failed_reason = Set(Some(EVM_REVERT.to_string()));
                TransactionState::Failed
            };
            self.transition(&tx, next, changes).await?;
            return Ok(());
        }

        let visible = self.chain.get_transaction(hash).await?.is_some();
        if !visible {
            if exceeded(tx.last_broadcast_on, self.config.rebroadcast_after) {
                self.rebroadcast_submitted(tx).await?;
            }
            return Ok(());
        }

        if exceeded(tx.submitted_on, self.config.confirmation_timeout) {
            warn!(logical_id = tx.id, hash = %tx.hash, "Transaction unconfirmed past timeout");
            let changes = onchain_transactions::ActiveModel {
                failed_on: Set(Some(Utc::now())),
                failed_reason: Set(Some(CONFIRMATION_TIMEOUT.to_string())),
                ..Default::default()
            };
            self.transition(&tx, TransactionState::Failed, changes).await?;
        }
        Ok(())
    }

    async fn rebroadcast_submitted(&self, tx: onchain_transactions::Model) -> Result<(), HubError> {
        info!(logical_id = tx.id, hash = %tx.hash, "Rebroadcasting transaction missing from mempool");
        let now = Utc::now();
        match self.broadcast(&tx).await? {
            Broadcast::Accepted => {
                let changes = onchain_transactions::ActiveModel {
                    last_broadcast_on: Set(Some(now)),
                    ..Default::default()
                };
                self.touch(&tx, changes).await?;
            }
            Broadcast::Rejected(reason) => {
                let changes = onchain_transactions::ActiveModel {
                    pending_failure_on: Set(Some(now)),
                    last_broadcast_on: Set(Some(now)),
                    failed_reason: Set(Some(reason)),
                    ..Default::default()
                };
                if let Some(updated) = self
                    .transition(&tx, TransactionState::PendingFailure, changes)
                    .await?
                {
                    self.process_pending_failure(updated).await?;
                }
            }
            Broadcast::Retry => {}
        }
        Ok(())
    }

    async fn process_pending_failure(&self, tx: onchain_transactions::Model) -> Result<(), HubError> {
        let hash = parse_hash(&tx)?;
        let now = Utc::now();

        if self.chain.get_transaction(hash).await?.is_some() {
            info!(logical_id = tx.id, hash = %hash, "Transaction visible again, back to submitted");
            let changes = onchain_transactions::ActiveModel {
                submitted_on: Set(Some(tx.submitted_on.unwrap_or(now))),
                last_broadcast_on: Set(Some(now)),
                ..Default::default()
            };
            self.transition(&tx, TransactionState::Submitted, changes).await?;
            return Ok(());
        }

        // No node ever accepted it and the chain does not know the hash
        if tx.submitted_on.is_none() {
            return self.fail_pending(&tx, None).await;
        }

        let superseded = OnchainTransactions::find()
            .filter(onchain_transactions::Column::FromAddress.eq(tx.from_address.as_str()))
            .filter(onchain_transactions::Column::State.eq(TransactionState::Confirmed.as_str()))
            .filter(onchain_transactions::Column::Nonce.gt(tx.nonce))
            .one(self.ledger.connection())
            .await?;
        if let Some(later) = superseded {
            let reason = format!("superseded by confirmed nonce {}", later.nonce);
            return self.fail_pending(&tx, Some(reason)).await;
        }

        if exceeded(tx.pending_failure_on, self.config.pending_failure_timeout) {
            return self.fail_pending(&tx, None).await;
        }

        if exceeded(tx.last_broadcast_on, self.config.pending_failure_rebroadcast_after) {
            debug!(logical_id = tx.id, "Rebroadcasting pending_failure transaction");
            match self.broadcast(&tx).await? {
                Broadcast::Accepted => {
                    let changes = onchain_transactions::ActiveModel {
                        last_broadcast_on: Set(Some(now)),
                        ..Default::default()
                    };
                    self.transition(&tx, TransactionState::Submitted, changes).await?;
                }
                Broadcast::Rejected(_) | Broadcast::Retry => {
                    let changes = onchain_transactions::ActiveModel {
                        last_broadcast_on: Set(Some(now)),
                        ..Default::default()
                    };
                    self.touch(&tx, changes).await?;
                }
            }
        }
        Ok(())
    }

    async fn fail_pending(
        &self,
        tx: &onchain_transactions::Model,
        reason: Option<String>,
    ) -> Result<(), HubError> {
        let reason = reason
            .or_else(|| tx.failed_reason.clone())
            .unwrap_or_else(|| "rejected by node".to_string());
        let changes = onchain_transactions::ActiveModel {
            failed_on: Set(Some(Utc::now())),
            failed_reason: Set(Some(reason)),
            ..Default::default()
        };
        self.transition(tx, TransactionState::Failed, changes).await?;
        Ok(())
    }

    /// Move `tx` to `next` if nobody else moved it first; terminal
    /// transitions run the completion callback.
    async fn transition(
        &self,
        tx: &onchain_transactions::Model,
        next: TransactionState,
        changes: onchain_transactions::ActiveModel,
    ) -> Result<Option<onchain_transactions::Model>, HubError> {
        let updated = apply_transition(self.ledger.connection(), tx, next, changes).await?;
        if let Some(updated) = &updated {
            if next.is_terminal() {
                self.complete(updated).await;
            }
        }
        Ok(updated)
    }

    /// Update bookkeeping columns without changing state
    async fn touch(
        &self,
        tx: &onchain_transactions::Model,
        changes: onchain_transactions::ActiveModel,
    ) -> Result<(), HubError> {
        OnchainTransactions::update_many()
            .set(changes)
            .filter(onchain_transactions::Column::Id.eq(tx.id))
            .filter(onchain_transactions::Column::State.eq(tx.state.as_str()))
            .exec(self.ledger.connection())
            .await?;
        Ok(())
    }

    /// Run the completion callback, bounded by the callback timeout, then
    /// wake anyone waiting on this transaction.
    async fn complete(&self, tx: &onchain_transactions::Model) {
        let state = TransactionState::from_str(&tx.state).unwrap_or(TransactionState::Failed);
        info!(
            logical_id = tx.id,
            state = %state,
            hash = %tx.hash,
            failed_reason = ?tx.failed_reason,
            "Onchain transaction finished"
        );

        match serde_json::from_str::<TransactionMeta>(&tx.meta) {
            Ok(meta) => {
                if let Some(name) = meta.complete_callback {
                    self.invoke_callback(&name, tx).await;
                }
            }
            Err(e) => {
                error!(logical_id = tx.id, error = %e, "Transaction meta is unreadable, callback skipped");
            }
        }

        let _ = self.completions.send(TransactionCompletion {
            logical_id: tx.id,
            state,
        });
    }

    async fn invoke_callback(&self, name: &str, tx: &onchain_transactions::Model) {
        let callback = match CompletionCallback::from_str(name) {
            Ok(callback) => callback,
            Err(e) => {
                error!(logical_id = tx.id, error = %e, "Unknown completion callback");
                return;
            }
        };
        let Some(handler) = self.registry.resolve(callback) else {
            error!(logical_id = tx.id, callback = %callback, "Completion handler is gone");
            return;
        };

        match tokio::time::timeout(
            self.config.callback_timeout,
            handler.on_transaction_complete(callback, tx),
        )
        .await
        {
            Ok(Ok(())) => debug!(logical_id = tx.id, callback = %callback, "Completion callback done"),
            Ok(Err(e)) => {
                error!(logical_id = tx.id, callback = %callback, error = %e, "Completion callback failed")
            }
            Err(_) => error!(
                logical_id = tx.id,
                callback = %callback,
                timeout_secs = self.config.callback_timeout.as_secs(),
                "Completion callback timed out"
            ),
        }
    }

    /// Mark a never-broadcast-successfully `new` transaction failed inside
    /// `txn`. The callback runs after `txn` commits.
    pub async fn mark_failed_in_txn(
        self: &Arc<Self>,
        txn: &mut LedgerTxn,
        tx: &onchain_transactions::Model,
        reason: &str,
    ) -> Result<onchain_transactions::Model, HubError> {
        let changes = onchain_transactions::ActiveModel {
            failed_on: Set(Some(Utc::now())),
            failed_reason: Set(Some(reason.to_string())),
            ..Default::default()
        };
        let updated = apply_transition(txn.conn(), tx, TransactionState::Failed, changes)
            .await?
            .ok_or_else(|| {
                HubError::validation(format!("Transaction {} changed state concurrently", tx.id))
            })?;

        let manager = Arc::clone(self);
        let completed = updated.clone();
        txn.after_commit(move || async move {
            manager.complete(&completed).await;
        });
        Ok(updated)
    }

    pub async fn find(&self, logical_id: i32) -> Result<Option<onchain_transactions::Model>, HubError> {
        Ok(OnchainTransactions::find_by_id(logical_id)
            .one(self.ledger.connection())
            .await?)
    }

    /// Wait until `logical_id` is confirmed or failed
    pub async fn await_transaction(
        &self,
        logical_id: i32,
    ) -> Result<onchain_transactions::Model, HubError> {
        let mut completions = self.subscribe();

        loop {
            let tx = self.find(logical_id).await?.ok_or_else(|| {
                HubError::validation(format!("Unknown onchain transaction {}", logical_id))
            })?;
            let state = TransactionState::from_str(&tx.state).map_err(HubError::Fatal)?;
            if state.is_terminal() {
                return Ok(tx);
            }

            loop {
                match completions.recv().await {
                    Ok(done) if done.logical_id == logical_id => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Completion listener lagged, rechecking");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(HubError::fatal("Completion channel closed"));
                    }
                }
            }
        }
    }
}

fn parse_hash(tx: &onchain_transactions::Model) -> Result<B256, HubError> {
    B256::from_str(&tx.hash)
        .map_err(|e| HubError::fatal(format!("Stored hash of transaction {} is invalid: {}", tx.id, e)))
}

/// Conditional state change: only applies while the row is still in the
/// state `tx` was read in, so each transition happens exactly once.
async fn apply_transition<C: ConnectionTrait>(
    conn: &C,
    tx: &onchain_transactions::Model,
    next: TransactionState,
    mut changes: onchain_transactions::ActiveModel,
) -> Result<Option<onchain_transactions::Model>, HubError> {
    changes.state = Set(next.as_str().to_string());

    let result = OnchainTransactions::update_many()
        .set(changes)
        .filter(onchain_transactions::Column::Id.eq(tx.id))
        .filter(onchain_transactions::Column::State.eq(tx.state.as_str()))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(
            logical_id = tx.id,
            from = %tx.state,
            to = %next,
            "Transaction state changed concurrently, skipping transition"
        );
        return Ok(None);
    }

    info!(logical_id = tx.id, from = %tx.state, to = %next, "Transaction state transition");

    let updated = OnchainTransactions::find_by_id(tx.id)
        .one(conn)
        .await?
        .ok_or_else(|| HubError::fatal(format!("Transaction {} vanished", tx.id)))?;
    Ok(Some(updated))
}
