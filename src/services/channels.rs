//! Channel state machine
//!
//! `apply_update` validates a user's update against the latest signed
//! state under a lock on the user's channel row, countersigns it and
//! appends it to the ledger. Updates that need an on-chain step are handed
//! to the onchain transaction manager inside the same ledger transaction.
//!
//! Proposals (`request_*`, `collateralize_if_necessary`) derive an
//! unsigned update and park its arguments in the pending-update cache
//! until the user sends back the countersigned version.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use sea_orm::{EntityTrait, QuerySelect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::entities::{channels, onchain_transactions};
use crate::entities::prelude::OnchainTransactions;
use crate::error::HubError;
use crate::ledger::{Ledger, LedgerTxn};
use crate::models::channel::{ChannelState, ChannelStatus, SignedChannelState};
use crate::models::onchain_transaction::{TransactionMeta, TransactionState};
use crate::models::update::{
    ChannelUpdateRow, ConfirmPendingArgs, DepositArgs, ExchangeArgs, InvalidationArgs,
    InvalidationReason, Party, UpdateArgs, UpdateRequest, WithdrawalArgs,
};
use crate::services::amounts::{checked_debit, div_rate};
use crate::services::callbacks::{CompletionCallback, CompletionHandler};
use crate::services::chain_client::{encode_hub_authorized_update, ChainClient};
use crate::services::channel_ledger;
use crate::services::collateralization::{
    cap_exchange, deposit_collateral, recollateralization_amount, withdrawal_hub_target,
    CollateralizationPolicy,
};
use crate::services::exchange_rates;
use crate::services::onchain_transactions::{OnchainTransactionManager, OnchainTransactionRequest};
use crate::services::pending_update_cache::{PendingAuthorization, PendingUpdateCache};
use crate::services::signer::{verify_state_signature, HubSigner};
use crate::services::state_generator;
use crate::services::threads::ThreadService;

/// An update the hub wants the user to countersign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedUpdate {
    pub authorization: PendingAuthorization,
    pub args: UpdateArgs,
    pub tx_count: u64,
    /// Unsigned successor of the latest state
    pub state: ChannelState,
}

/// What the user asks to take out of the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub recipient: Address,
    #[serde(with = "crate::services::amounts::decimal_string")]
    pub withdrawal_wei_user: U256,
    /// Tokens to convert to wei before withdrawing
    #[serde(with = "crate::services::amounts::decimal_string")]
    pub tokens_to_sell: U256,
    #[serde(with = "crate::services::amounts::decimal_string")]
    pub withdrawal_token_user: U256,
}

pub struct ChannelsService {
    ledger: Ledger,
    config: HubConfig,
    signer: Arc<HubSigner>,
    chain: Arc<dyn ChainClient>,
    transactions: Arc<OnchainTransactionManager>,
    cache: PendingUpdateCache,
    collateral: Arc<CollateralizationPolicy>,
    threads: Arc<dyn ThreadService>,
}

impl ChannelsService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Ledger,
        config: HubConfig,
        signer: Arc<HubSigner>,
        chain: Arc<dyn ChainClient>,
        transactions: Arc<OnchainTransactionManager>,
        cache: PendingUpdateCache,
        collateral: Arc<CollateralizationPolicy>,
        threads: Arc<dyn ThreadService>,
    ) -> Self {
        Self {
            ledger,
            config,
            signer,
            chain,
            transactions,
            cache,
            collateral,
            threads,
        }
    }

    fn contract(&self) -> Address {
        self.config.channel_manager_address
    }

    /// Lock the channel and require it to be open
    async fn open_channel(&self, txn: &LedgerTxn, user: Address) -> Result<channels::Model, HubError> {
        let channel = channel_ledger::lock_channel(txn, self.contract(), user).await?;
        let status: ChannelStatus = channel.status.parse().map_err(HubError::Fatal)?;
        if status != ChannelStatus::Open {
            return Err(HubError::validation(format!(
                "Channel for {} is {}, expected {}",
                user,
                status,
                ChannelStatus::Open
            )));
        }
        Ok(channel)
    }

    async fn pending_timeout(&self) -> Result<u64, HubError> {
        let now = self.chain.latest_block_timestamp().await?;
        Ok(now + self.config.pending_state_timeout_secs)
    }

    /// Validate, countersign and persist a user's update. `Ok(None)` means
    /// the update was dropped as an expected race.
    pub async fn apply_update(
        self: &Arc<Self>,
        user: Address,
        update: UpdateRequest,
    ) -> Result<Option<ChannelUpdateRow>, HubError> {
        let mut txn = self.ledger.begin().await?;
        let channel = self.open_channel(&txn, user).await?;
        let latest = channel_ledger::latest_state(txn.conn(), self.contract(), user).await?;

        // Proposals check txCount only once their cached proposal is found
        if !update.args.is_proposal() {
            ensure_next_tx_count(&latest, &update)?;
        }

        debug!(user = %user, reason = %update.args.reason(), tx_count = update.tx_count, "Applying update");

        let applied = match &update.args {
            UpdateArgs::Payment(_) => {
                let state = state_generator::generate(&latest.state, &update.args)?;
                let row = self
                    .countersign(&txn, &channel, &update.args, state, update.sig_user.as_deref(), None)
                    .await?;
                Some(row)
            }
            UpdateArgs::Exchange(_)
            | UpdateArgs::ProposePendingDeposit(_)
            | UpdateArgs::ProposePendingWithdrawal(_) => {
                self.apply_proposed(&mut txn, &channel, &latest, &update).await?
            }
            UpdateArgs::ConfirmPending(_) => {
                error!(user = %user, "Client submitted a ConfirmPending update");
                return Err(HubError::fatal("ConfirmPending updates are never accepted from clients"));
            }
            UpdateArgs::Invalidation(args) => {
                let sig_user = update.sig_user.as_deref().ok_or_else(|| {
                    HubError::validation("Invalidation update requires the user's signature")
                })?;
                self.invalidate(&mut txn, &channel, &latest, args, Some(sig_user))
                    .await?
            }
            UpdateArgs::OpenThread(args) => {
                let service = Arc::clone(self);
                let receiver = args.receiver;
                tokio::spawn(async move {
                    if let Err(e) = service.collateralize_if_necessary(receiver).await {
                        warn!(user = %receiver, error = %e, "Collateralization check for thread receiver failed");
                    }
                });

                let state = self.threads.open_thread(&txn, &latest.state, args).await?;
                let row = self
                    .countersign(&txn, &channel, &update.args, state, update.sig_user.as_deref(), None)
                    .await?;
                Some(row)
            }
            UpdateArgs::CloseThread(args) => {
                let state = self.threads.close_thread(&txn, &latest.state, args).await?;
                let row = self
                    .countersign(&txn, &channel, &update.args, state, update.sig_user.as_deref(), None)
                    .await?;
                Some(row)
            }
        };

        let Some(row) = applied else {
            txn.rollback().await?;
            return Ok(None);
        };

        txn.commit().await?;
        info!(
            user = %user,
            reason = %row.reason(),
            tx_count = row.state.state.tx_count_global,
            "Applied channel update"
        );
        Ok(Some(row))
    }

    /// Verify the user's signature over `state`, add the hub's and persist
    async fn countersign(
        &self,
        txn: &LedgerTxn,
        channel: &channels::Model,
        args: &UpdateArgs,
        state: ChannelState,
        sig_user: Option<&str>,
        onchain_tx_logical_id: Option<i32>,
    ) -> Result<ChannelUpdateRow, HubError> {
        let sig_user = sig_user.ok_or_else(|| {
            HubError::validation(format!("{} update requires the user's signature", args.reason()))
        })?;
        verify_state_signature(&state, sig_user, state.user)?;

        let signed = SignedChannelState {
            sig_hub: Some(self.signer.sign_state(&state)?),
            sig_user: Some(sig_user.to_string()),
            state,
        };
        channel_ledger::insert_update(txn, channel, args, &signed, onchain_tx_logical_id).await
    }

    /// Countersigned version of an update the hub proposed earlier
    async fn apply_proposed(
        &self,
        txn: &mut LedgerTxn,
        channel: &channels::Model,
        latest: &SignedChannelState,
        update: &UpdateRequest,
    ) -> Result<Option<ChannelUpdateRow>, HubError> {
        let user = latest.state.user;
        let Some(cached) = self.cache.get(user).await else {
            warn!(
                user = %user,
                reason = %update.args.reason(),
                tx_count = update.tx_count,
                "No pending proposal for update, possibly expired or a duplicate"
            );
            return Ok(None);
        };
        ensure_next_tx_count(latest, update)?;

        if cached.args != update.args || cached.tx_count != update.tx_count {
            return Err(HubError::validation(format!(
                "{} update for {} does not match the pending proposal",
                update.args.reason(),
                user
            )));
        }

        let authorization_ok = match (&update.args, cached.authorization) {
            (UpdateArgs::Exchange(_), PendingAuthorization::Offchain) => true,
            (UpdateArgs::ProposePendingDeposit(_), PendingAuthorization::UserAuthorized) => true,
            (UpdateArgs::ProposePendingDeposit(_), PendingAuthorization::HubAuthorized) => true,
            (UpdateArgs::ProposePendingWithdrawal(_), PendingAuthorization::HubAuthorized) => true,
            _ => false,
        };
        if !authorization_ok {
            return Err(HubError::fatal(format!(
                "{} cached with incompatible authorization {:?}",
                update.args.reason(),
                cached.authorization
            )));
        }

        if matches!(
            update.args,
            UpdateArgs::Exchange(_) | UpdateArgs::ProposePendingWithdrawal(_)
        ) {
            exchange_rates::latest_rate(txn.conn(), self.config.max_exchange_rate_age).await?;
        }

        let state = state_generator::generate(&latest.state, &update.args)?;
        let sig_user = update.sig_user.as_deref().ok_or_else(|| {
            HubError::validation(format!("{} update requires the user's signature", update.args.reason()))
        })?;
        verify_state_signature(&state, sig_user, user)?;

        let onchain_tx_logical_id = if cached.authorization == PendingAuthorization::HubAuthorized {
            let request = OnchainTransactionRequest {
                from: self.signer.address(),
                to: self.contract(),
                value: U256::ZERO,
                data: encode_hub_authorized_update(&state, sig_user),
                gas: None,
                meta: TransactionMeta {
                    complete_callback: Some(CompletionCallback::HubAuthorizedUpdate.as_str().to_string()),
                    reason: "hubAuthorizedUpdate".to_string(),
                },
            };
            let tx = self.transactions.send_transaction(txn, request).await?;
            Some(tx.id)
        } else {
            None
        };

        let row = self
            .countersign(txn, channel, &update.args, state, Some(sig_user), onchain_tx_logical_id)
            .await?;

        let cache = self.cache.clone();
        txn.after_commit(move || async move {
            cache.consume(user).await;
        });
        Ok(Some(row))
    }

    /// Roll back to `previous_valid_tx_count`. Refused softly while any
    /// transaction in the range might still land. `sig_user` is `None` only
    /// for the hub's own invalidation of a failed transaction.
    async fn invalidate(
        &self,
        txn: &mut LedgerTxn,
        channel: &channels::Model,
        latest: &SignedChannelState,
        args: &InvalidationArgs,
        sig_user: Option<&str>,
    ) -> Result<Option<ChannelUpdateRow>, HubError> {
        let user = latest.state.user;
        if args.last_invalid_tx_count != latest.state.tx_count_global {
            return Err(HubError::validation(format!(
                "Invalidation must end at the latest update {}, got {}",
                latest.state.tx_count_global, args.last_invalid_tx_count
            )));
        }
        if args.previous_valid_tx_count >= args.last_invalid_tx_count {
            return Err(HubError::validation(format!(
                "Invalid invalidation range {}..{}",
                args.previous_valid_tx_count, args.last_invalid_tx_count
            )));
        }
        if !latest.state.has_pending_ops() {
            return Err(HubError::validation(format!(
                "Latest state of {} has no pending operations to invalidate",
                user
            )));
        }

        let range = channel_ledger::updates_in_range(
            txn.conn(),
            user,
            args.previous_valid_tx_count + 1,
            args.last_invalid_tx_count,
        )
        .await?;

        let mut abandoned: Vec<onchain_transactions::Model> = Vec::new();
        let mut all_failed = true;
        for update in &range {
            let Some(logical_id) = update.onchain_tx_logical_id else {
                continue;
            };
            let tx = OnchainTransactions::find_by_id(logical_id)
                .lock_exclusive()
                .one(txn.conn())
                .await?
                .ok_or_else(|| HubError::fatal(format!("Update {} references missing transaction {}", update.id, logical_id)))?;
            let state: TransactionState = tx.state.parse().map_err(HubError::Fatal)?;
            match state {
                TransactionState::Submitted | TransactionState::PendingFailure => {
                    warn!(
                        user = %user,
                        logical_id = logical_id,
                        state = %state,
                        "Refusing invalidation while transaction may still land"
                    );
                    return Ok(None);
                }
                TransactionState::Confirmed => {
                    return Err(HubError::validation(format!(
                        "Transaction {} for txCount {} is already confirmed",
                        logical_id, update.tx_count_global
                    )));
                }
                TransactionState::New => {
                    all_failed = false;
                    abandoned.push(tx);
                }
                TransactionState::Failed => {}
            }
        }

        if !(all_failed && range.iter().any(|u| u.onchain_tx_logical_id.is_some())) {
            let chain_now = self.chain.latest_block_timestamp().await?;
            if chain_now <= latest.state.timeout {
                warn!(
                    user = %user,
                    chain_now = chain_now,
                    timeout = latest.state.timeout,
                    "Refusing invalidation before the pending timeout elapsed"
                );
                return Ok(None);
            }
        }

        for tx in &abandoned {
            self.transactions
                .mark_failed_in_txn(txn, tx, "abandoned by invalidation")
                .await?;
        }

        let previous_valid = if args.previous_valid_tx_count == 0 {
            ChannelState::empty(self.contract(), user)
        } else {
            let row = channel_ledger::update_at(txn.conn(), user, args.previous_valid_tx_count)
                .await?
                .ok_or_else(|| {
                    HubError::validation(format!("No update at txCount {}", args.previous_valid_tx_count))
                })?;
            if row.invalid {
                return Err(HubError::validation(format!(
                    "Update at txCount {} is already invalid",
                    args.previous_valid_tx_count
                )));
            }
            channel_ledger::state_from_row(&row)?
        };

        let state = state_generator::invalidation(&latest.state, &previous_valid, args)?;
        if let Some(sig) = sig_user {
            verify_state_signature(&state, sig, user)?;
        }

        let signed = SignedChannelState {
            sig_hub: Some(self.signer.sign_state(&state)?),
            sig_user: sig_user.map(str::to_string),
            state,
        };
        let update_args = UpdateArgs::Invalidation(args.clone());
        let row = channel_ledger::insert_update(txn, channel, &update_args, &signed, None).await?;
        let marked = channel_ledger::mark_invalid(
            txn,
            user,
            args.previous_valid_tx_count + 1,
            args.last_invalid_tx_count,
        )
        .await?;

        info!(
            user = %user,
            previous_valid = args.previous_valid_tx_count,
            last_invalid = args.last_invalid_tx_count,
            marked = marked,
            reason = ?args.reason,
            "Invalidated channel updates"
        );
        Ok(Some(row))
    }

    /// Propose a user deposit plus matching hub collateral. The user
    /// broadcasts the resulting state.
    pub async fn request_deposit(
        &self,
        user: Address,
        deposit_wei_user: U256,
        deposit_token_user: U256,
    ) -> Result<Option<ProposedUpdate>, HubError> {
        let txn = self.ledger.begin().await?;
        self.open_channel(&txn, user).await?;
        let latest = channel_ledger::latest_state(txn.conn(), self.contract(), user).await?;
        if latest.state.has_pending_ops() {
            return Err(HubError::validation(format!(
                "Channel for {} already has a pending deposit or withdrawal",
                user
            )));
        }

        let rate = exchange_rates::latest_rate(txn.conn(), self.config.max_exchange_rate_age).await?;
        let deposit_token_hub = deposit_collateral(
            self.collateral.config(),
            deposit_wei_user,
            rate,
            latest.state.balance_token_hub,
        );

        let args = UpdateArgs::ProposePendingDeposit(DepositArgs {
            deposit_wei_hub: U256::ZERO,
            deposit_wei_user,
            deposit_token_hub,
            deposit_token_user,
            timeout: self.pending_timeout().await?,
        });
        txn.commit().await?;

        self.propose(&latest.state, PendingAuthorization::UserAuthorized, args).await
    }

    /// Propose an exchange at the latest rate, capped by both balances
    pub async fn request_exchange(
        &self,
        user: Address,
        tokens_to_sell: U256,
        wei_to_sell: U256,
    ) -> Result<Option<ProposedUpdate>, HubError> {
        let txn = self.ledger.begin().await?;
        self.open_channel(&txn, user).await?;
        let latest = channel_ledger::latest_state(txn.conn(), self.contract(), user).await?;
        let rate = exchange_rates::latest_rate(txn.conn(), self.config.max_exchange_rate_age).await?;
        txn.commit().await?;

        let (tokens, wei) = cap_exchange(&latest.state, Party::User, rate, tokens_to_sell, wei_to_sell);
        if tokens.is_zero() && wei.is_zero() {
            debug!(user = %user, "Exchange amount rounds to zero, nothing to propose");
            return Ok(None);
        }

        let args = UpdateArgs::Exchange(ExchangeArgs {
            exchange_rate: rate.normalize().to_string(),
            seller: Party::User,
            tokens_to_sell: tokens,
            wei_to_sell: wei,
        });
        self.propose(&latest.state, PendingAuthorization::Offchain, args).await
    }

    /// Propose a withdrawal the hub submits on-chain. The hub's token
    /// balance is rebalanced towards its collateral target in the same step.
    pub async fn request_withdrawal(
        &self,
        user: Address,
        request: WithdrawalRequest,
    ) -> Result<Option<ProposedUpdate>, HubError> {
        let txn = self.ledger.begin().await?;
        self.open_channel(&txn, user).await?;
        let latest = channel_ledger::latest_state(txn.conn(), self.contract(), user).await?;
        if latest.state.has_pending_ops() {
            return Err(HubError::validation(format!(
                "Channel for {} already has a pending deposit or withdrawal",
                user
            )));
        }
        let rate = exchange_rates::latest_rate(txn.conn(), self.config.max_exchange_rate_age).await?;
        txn.commit().await?;

        let state = &latest.state;
        if request.withdrawal_token_user.saturating_add(request.tokens_to_sell) > state.balance_token_user {
            return Err(HubError::validation(format!(
                "Withdrawal of {} tokens plus {} to sell exceeds balance {}",
                request.withdrawal_token_user, request.tokens_to_sell, state.balance_token_user
            )));
        }

        let (tokens_to_sell, _) = cap_exchange(state, Party::User, rate, request.tokens_to_sell, U256::ZERO);
        let wei_bought = div_rate(tokens_to_sell, rate).unwrap_or(U256::ZERO);
        let user_wei = state.balance_wei_user.saturating_add(wei_bought);
        let remaining_user_wei = checked_debit(user_wei, request.withdrawal_wei_user, "balanceWeiUser")
            .map_err(HubError::Validation)?;

        let targets = self.collateral.targets_for(user).await?;
        let hub_target = withdrawal_hub_target(&targets, remaining_user_wei, rate);
        let hub_booty = state.balance_token_hub.saturating_add(tokens_to_sell);

        let (withdrawal_token_hub, deposit_token_hub) = if hub_booty > hub_target {
            (hub_booty - hub_target, U256::ZERO)
        } else {
            (
                U256::ZERO,
                (hub_target - hub_booty).min(self.collateral.config().channel_bei_deposit),
            )
        };

        let args = UpdateArgs::ProposePendingWithdrawal(WithdrawalArgs {
            exchange_rate: rate.normalize().to_string(),
            tokens_to_sell,
            wei_to_sell: U256::ZERO,
            recipient: request.recipient,
            withdrawal_wei_user: request.withdrawal_wei_user,
            withdrawal_token_user: request.withdrawal_token_user,
            withdrawal_wei_hub: U256::ZERO,
            withdrawal_token_hub,
            deposit_wei_hub: U256::ZERO,
            deposit_token_hub,
            timeout: self.pending_timeout().await?,
        });
        self.propose(state, PendingAuthorization::HubAuthorized, args).await
    }

    /// Propose a hub collateral deposit when the hub's token balance fell
    /// below the policy minimum
    pub async fn collateralize_if_necessary(
        &self,
        user: Address,
    ) -> Result<Option<ProposedUpdate>, HubError> {
        let txn = self.ledger.begin().await?;
        self.open_channel(&txn, user).await?;
        let latest = channel_ledger::latest_state(txn.conn(), self.contract(), user).await?;
        txn.commit().await?;

        if latest.state.has_pending_ops() {
            debug!(user = %user, "Pending operation in flight, skipping collateralization");
            return Ok(None);
        }

        let targets = self.collateral.targets_for(user).await?;
        let current = latest.state.balance_token_hub;
        let Some(amount) = recollateralization_amount(&targets, current) else {
            if current > targets.max_amount {
                debug!(
                    user = %user,
                    current = %current,
                    max = %targets.max_amount,
                    "Hub collateral above maximum, leaving as is"
                );
            }
            return Ok(None);
        };

        info!(user = %user, current = %current, amount = %amount, "Proposing collateral deposit");
        let args = UpdateArgs::ProposePendingDeposit(DepositArgs {
            deposit_wei_hub: U256::ZERO,
            deposit_wei_user: U256::ZERO,
            deposit_token_hub: amount,
            deposit_token_user: U256::ZERO,
            timeout: self.pending_timeout().await?,
        });
        self.propose(&latest.state, PendingAuthorization::HubAuthorized, args).await
    }

    async fn propose(
        &self,
        latest: &ChannelState,
        authorization: PendingAuthorization,
        args: UpdateArgs,
    ) -> Result<Option<ProposedUpdate>, HubError> {
        let state = state_generator::generate(latest, &args)?;
        let tx_count = state.tx_count_global;

        match self.cache.propose(latest.user, authorization, args.clone(), tx_count).await {
            Ok(_) => Ok(Some(ProposedUpdate {
                authorization,
                args,
                tx_count,
                state,
            })),
            Err(HubError::PendingUpdateExists { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The live proposal for `user`, re-derived from the latest state
    pub async fn pending_update(&self, user: Address) -> Result<Option<ProposedUpdate>, HubError> {
        let Some(cached) = self.cache.get(user).await else {
            return Ok(None);
        };
        let latest = channel_ledger::latest_state(self.ledger.connection(), self.contract(), user).await?;
        if latest.state.tx_count_global + 1 != cached.tx_count {
            debug!(user = %user, "Pending proposal is stale");
            return Ok(None);
        }
        let state = state_generator::generate(&latest.state, &cached.args)?;
        Ok(Some(ProposedUpdate {
            authorization: cached.authorization,
            args: cached.args,
            tx_count: cached.tx_count,
            state,
        }))
    }

    /// Record that the pending deposit/withdrawal landed on-chain
    pub async fn confirm_pending(
        &self,
        user: Address,
        transaction_hash: B256,
    ) -> Result<Option<ChannelUpdateRow>, HubError> {
        let txn = self.ledger.begin().await?;
        let channel = channel_ledger::lock_channel(&txn, self.contract(), user).await?;
        let latest = channel_ledger::latest_state(txn.conn(), self.contract(), user).await?;

        if !latest.state.has_pending_ops() {
            debug!(user = %user, hash = %transaction_hash, "Nothing pending, confirmation already applied");
            return Ok(None);
        }

        let state = state_generator::confirm_pending(&latest.state)?;
        let signed = SignedChannelState {
            sig_hub: Some(self.signer.sign_state(&state)?),
            sig_user: None,
            state,
        };
        let args = UpdateArgs::ConfirmPending(ConfirmPendingArgs { transaction_hash });
        let row = channel_ledger::insert_update(&txn, &channel, &args, &signed, None).await?;
        txn.commit().await?;

        info!(
            user = %user,
            hash = %transaction_hash,
            tx_count = row.state.state.tx_count_global,
            "Confirmed pending channel operation"
        );
        Ok(Some(row))
    }

    pub async fn latest_state(&self, user: Address) -> Result<SignedChannelState, HubError> {
        channel_ledger::latest_state(self.ledger.connection(), self.contract(), user).await
    }

    pub async fn channel_updates_since(
        &self,
        user: Address,
        tx_count: u64,
    ) -> Result<Vec<ChannelUpdateRow>, HubError> {
        channel_ledger::updates_since(self.ledger.connection(), user, tx_count).await
    }

    async fn on_hub_authorized_update_complete(
        &self,
        tx: &onchain_transactions::Model,
    ) -> Result<(), HubError> {
        let Some(update) = channel_ledger::find_by_onchain_tx(self.ledger.connection(), tx.id).await? else {
            warn!(logical_id = tx.id, "No channel update references completed transaction");
            return Ok(());
        };
        if update.invalid {
            debug!(logical_id = tx.id, update_id = update.id, "Update already invalidated");
            return Ok(());
        }
        let user = channel_ledger::parse_address(&update.user_address)?;

        match tx.state.parse::<TransactionState>().map_err(HubError::Fatal)? {
            TransactionState::Confirmed => {
                let hash = tx
                    .hash
                    .parse::<B256>()
                    .map_err(|e| HubError::fatal(format!("Invalid transaction hash {}: {}", tx.hash, e)))?;
                self.confirm_pending(user, hash).await?;
            }
            TransactionState::Failed => {
                let mut txn = self.ledger.begin().await?;
                let channel = channel_ledger::lock_channel(&txn, self.contract(), user).await?;
                let latest = channel_ledger::latest_state(txn.conn(), self.contract(), user).await?;
                if !latest.state.has_pending_ops() {
                    debug!(user = %user, "Nothing pending after failed transaction");
                    return Ok(());
                }

                let args = InvalidationArgs {
                    previous_valid_tx_count: (update.tx_count_global as u64).saturating_sub(1),
                    last_invalid_tx_count: latest.state.tx_count_global,
                    reason: InvalidationReason::TransactionFailed,
                    message: tx.failed_reason.clone(),
                };
                match self.invalidate(&mut txn, &channel, &latest, &args, None).await? {
                    Some(_) => txn.commit().await?,
                    None => txn.rollback().await?,
                }
            }
            other => {
                return Err(HubError::fatal(format!(
                    "Completion callback for non-terminal transaction {} in state {}",
                    tx.id, other
                )));
            }
        }
        Ok(())
    }
}

fn ensure_next_tx_count(latest: &SignedChannelState, update: &UpdateRequest) -> Result<(), HubError> {
    let expected = latest.state.tx_count_global + 1;
    if update.tx_count != expected {
        return Err(HubError::validation(format!(
            "Stale update for {}: txCount {} but next is {}",
            latest.state.user, update.tx_count, expected
        )));
    }
    Ok(())
}

#[async_trait]
impl CompletionHandler for ChannelsService {
    async fn on_transaction_complete(
        &self,
        callback: CompletionCallback,
        tx: &onchain_transactions::Model,
    ) -> Result<(), HubError> {
        match callback {
            CompletionCallback::HubAuthorizedUpdate => self.on_hub_authorized_update_complete(tx).await,
            other => Err(HubError::Config(format!("ChannelsService does not handle {}", other))),
        }
    }
}
