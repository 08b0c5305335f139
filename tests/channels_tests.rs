mod common;

use alloy::primitives::{B256, U256};
use chrono::Duration;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};

use payment_hub::entities::channels;
use payment_hub::error::HubError;
use payment_hub::jobs::collateral_sync::sync_collateral;
use payment_hub::models::channel::ChannelState;
use payment_hub::models::onchain_transaction::TransactionState;
use payment_hub::models::update::{
    ChannelUpdateRow, ConfirmPendingArgs, InvalidationArgs, InvalidationReason, Party,
    PaymentArgs, ThreadArgs, UpdateArgs, UpdateRequest,
};
use payment_hub::services::channels::{ProposedUpdate, WithdrawalRequest};
use payment_hub::services::pending_update_cache::PendingAuthorization;
use payment_hub::services::state_generator;

use crate::common::{contract_address, eth, insert_rate, tx_hash, TestHub, CHAIN_START};

/// 0.01 ETH, worth 1 token at a rate of 100
const SMALL_DEPOSIT_WEI: u64 = 10_000_000_000_000_000;

async fn setup() -> TestHub {
    let hub = TestHub::new().await;
    insert_rate(&hub.ledger, dec!(100), Duration::minutes(1)).await;
    hub
}

/// The user countersigns the hub's proposal and sends it back
async fn accept(hub: &TestHub, proposal: &ProposedUpdate) -> Option<ChannelUpdateRow> {
    let sig = hub.user.sign_state(&proposal.state).expect("user signs");
    hub.channels
        .apply_update(
            hub.user_address(),
            UpdateRequest {
                args: proposal.args.clone(),
                tx_count: proposal.tx_count,
                sig_user: Some(sig),
            },
        )
        .await
        .expect("apply proposal")
}

/// User deposit plus hub collateral, confirmed on-chain
async fn deposit_and_confirm(hub: &TestHub, wei: U256, tokens: U256) -> ChannelUpdateRow {
    let proposal = hub
        .channels
        .request_deposit(hub.user_address(), wei, tokens)
        .await
        .expect("request deposit")
        .expect("proposal");
    accept(hub, &proposal).await.expect("deposit applied");
    hub.channels
        .confirm_pending(hub.user_address(), B256::repeat_byte(0xdd))
        .await
        .expect("confirm pending")
        .expect("confirmation applied")
}

async fn pay(hub: &TestHub, args: PaymentArgs, tx_count: u64) -> Result<Option<ChannelUpdateRow>, HubError> {
    let latest = hub.channels.latest_state(hub.user_address()).await?;
    let state = state_generator::payment(&latest.state, &args).unwrap_or(latest.state);
    let sig = hub.user.sign_state(&state)?;
    hub.channels
        .apply_update(
            hub.user_address(),
            UpdateRequest {
                args: UpdateArgs::Payment(args),
                tx_count,
                sig_user: Some(sig),
            },
        )
        .await
}

/// User-signed invalidation of `previous_valid + 1 ..= last_invalid`
async fn invalidation(
    hub: &TestHub,
    previous_valid: u64,
    last_invalid: u64,
    reason: InvalidationReason,
) -> UpdateRequest {
    let user = hub.user_address();
    let args = InvalidationArgs {
        previous_valid_tx_count: previous_valid,
        last_invalid_tx_count: last_invalid,
        reason,
        message: None,
    };
    let latest = hub.channels.latest_state(user).await.expect("latest");
    let previous = if previous_valid == 0 {
        ChannelState::empty(contract_address(), user)
    } else {
        hub.channels
            .channel_updates_since(user, 0)
            .await
            .expect("history")
            .into_iter()
            .find(|u| u.state.state.tx_count_global == previous_valid)
            .expect("previous valid update")
            .state
            .state
    };
    let state = state_generator::invalidation(&latest.state, &previous, &args).unwrap_or(latest.state);
    let sig = hub.user.sign_state(&state).expect("user signs");

    UpdateRequest {
        args: UpdateArgs::Invalidation(args),
        tx_count: last_invalid + 1,
        sig_user: Some(sig),
    }
}

/// Deposit is capped at channelBeiDeposit, applied at txCount+1, and the
/// confirmation leaves nothing pending
#[tokio::test]
async fn test_user_deposit_end_to_end() {
    let hub = setup().await;
    let user = hub.user_address();

    let proposal = hub
        .channels
        .request_deposit(user, eth(1), U256::ZERO)
        .await
        .expect("request deposit")
        .expect("proposal");
    assert_eq!(proposal.authorization, PendingAuthorization::UserAuthorized);
    assert_eq!(proposal.tx_count, 1);
    match &proposal.args {
        UpdateArgs::ProposePendingDeposit(args) => {
            assert_eq!(args.deposit_wei_user, eth(1));
            assert_eq!(args.deposit_token_hub, eth(50));
            assert_eq!(args.timeout, CHAIN_START + 600);
        }
        other => panic!("unexpected proposal {:?}", other),
    }

    let applied = accept(&hub, &proposal).await.expect("deposit applied");
    let state = &applied.state.state;
    assert_eq!(state.tx_count_global, 1);
    assert_eq!(state.tx_count_chain, 1);
    assert_eq!(state.pending_deposit_wei_user, eth(1));
    assert_eq!(state.pending_deposit_token_hub, eth(50));
    assert!(applied.state.is_fully_signed());
    assert!(applied.onchain_tx_logical_id.is_none());

    // Consumed once applied
    assert!(hub.channels.pending_update(user).await.expect("pending").is_none());

    let confirmed = hub
        .channels
        .confirm_pending(user, B256::repeat_byte(0xdd))
        .await
        .expect("confirm")
        .expect("confirmation applied");
    let state = &confirmed.state.state;
    assert_eq!(state.tx_count_global, 2);
    assert!(!state.has_pending_ops());
    assert_eq!(state.balance_wei_user, eth(1));
    assert_eq!(state.balance_token_hub, eth(50));
    assert_eq!(state.timeout, 0);
    assert!(confirmed.state.sig_hub.is_some());
    assert!(confirmed.state.sig_user.is_none());

    // Second confirmation of the same deposit is a no-op
    let again = hub
        .channels
        .confirm_pending(user, B256::repeat_byte(0xdd))
        .await
        .expect("confirm again");
    assert!(again.is_none());

    let history = hub.channels.channel_updates_since(user, 0).await.expect("history");
    let counts: Vec<u64> = history.iter().map(|u| u.state.state.tx_count_global).collect();
    assert_eq!(counts, vec![1, 2]);
}

#[tokio::test]
async fn test_second_proposal_is_dropped() {
    let hub = setup().await;
    let user = hub.user_address();

    let first = hub
        .channels
        .request_deposit(user, eth(1), U256::ZERO)
        .await
        .expect("first request");
    assert!(first.is_some());

    let second = hub
        .channels
        .request_deposit(user, eth(2), U256::ZERO)
        .await
        .expect("second request");
    assert!(second.is_none());

    let pending = hub
        .channels
        .pending_update(user)
        .await
        .expect("pending")
        .expect("first proposal kept");
    assert_eq!(pending.args, first.expect("first").args);
}

/// Resending an already applied countersigned proposal is a no-op
#[tokio::test]
async fn test_resent_countersigned_proposal_is_dropped() {
    let hub = setup().await;
    let user = hub.user_address();

    let proposal = hub
        .channels
        .request_deposit(user, eth(1), U256::ZERO)
        .await
        .expect("request deposit")
        .expect("proposal");
    let sig = hub.user.sign_state(&proposal.state).expect("user signs");
    let request = UpdateRequest {
        args: proposal.args.clone(),
        tx_count: proposal.tx_count,
        sig_user: Some(sig),
    };

    let first = hub
        .channels
        .apply_update(user, request.clone())
        .await
        .expect("first submission");
    assert!(first.is_some());

    let duplicate = hub
        .channels
        .apply_update(user, request)
        .await
        .expect("duplicate submission");
    assert!(duplicate.is_none());

    let history = hub.channels.channel_updates_since(user, 0).await.expect("history");
    assert_eq!(history.len(), 1);
}

/// With a live proposal, a wrong txCount is still rejected as stale
#[tokio::test]
async fn test_proposal_with_wrong_tx_count_rejected() {
    let hub = setup().await;
    let user = hub.user_address();

    let proposal = hub
        .channels
        .request_deposit(user, eth(1), U256::ZERO)
        .await
        .expect("request deposit")
        .expect("proposal");
    let sig = hub.user.sign_state(&proposal.state).expect("user signs");

    let result = hub
        .channels
        .apply_update(
            user,
            UpdateRequest {
                args: proposal.args.clone(),
                tx_count: proposal.tx_count + 1,
                sig_user: Some(sig),
            },
        )
        .await;
    assert!(matches!(result, Err(HubError::Validation(_))));

    // The proposal survives for a correct resubmission
    assert!(hub.channels.pending_update(user).await.expect("pending").is_some());
}

/// A 25h old rate aborts the exchange before anything is written
#[tokio::test]
async fn test_exchange_with_stale_rate_is_fatal() {
    let hub = TestHub::new().await;
    insert_rate(&hub.ledger, dec!(100), Duration::hours(25)).await;
    let user = hub.user_address();

    let result = hub.channels.request_exchange(user, U256::ZERO, eth(1)).await;
    let err = result.expect_err("stale rate refused");
    assert!(matches!(err, HubError::StaleExchangeRate { .. }));
    assert!(err.is_fatal());

    assert!(hub.channels.pending_update(user).await.expect("pending").is_none());
    assert!(hub.channels.channel_updates_since(user, 0).await.expect("history").is_empty());
    let channel_count = channels::Entity::find().count(hub.db()).await.expect("count");
    assert_eq!(channel_count, 0);
}

#[tokio::test]
async fn test_missing_rate_refuses_deposit() {
    let hub = TestHub::new().await;

    let result = hub
        .channels
        .request_deposit(hub.user_address(), eth(1), U256::ZERO)
        .await;
    assert!(matches!(result, Err(HubError::MissingExchangeRate)));
}

#[tokio::test]
async fn test_exchange_wei_for_tokens() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, eth(1), U256::ZERO).await;

    let tenth = eth(1) / U256::from(10u64);
    let proposal = hub
        .channels
        .request_exchange(user, U256::ZERO, tenth)
        .await
        .expect("request exchange")
        .expect("proposal");
    assert_eq!(proposal.authorization, PendingAuthorization::Offchain);

    let applied = accept(&hub, &proposal).await.expect("exchange applied");
    let state = &applied.state.state;
    assert_eq!(state.tx_count_global, 3);
    assert_eq!(state.balance_wei_user, eth(1) - tenth);
    assert_eq!(state.balance_wei_hub, tenth);
    assert_eq!(state.balance_token_user, eth(10));
    assert_eq!(state.balance_token_hub, eth(40));
}

#[tokio::test]
async fn test_exchange_capped_by_hub_tokens() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, eth(1), U256::ZERO).await;

    // 1 ETH buys 100 tokens but the hub only holds 50
    let proposal = hub
        .channels
        .request_exchange(user, U256::ZERO, eth(1))
        .await
        .expect("request exchange")
        .expect("proposal");
    match proposal.args {
        UpdateArgs::Exchange(args) => {
            assert_eq!(args.seller, Party::User);
            assert_eq!(args.wei_to_sell, eth(1) / U256::from(2u64));
        }
        other => panic!("unexpected proposal {:?}", other),
    }
}

/// Payments must chain exactly on the latest txCount
#[tokio::test]
async fn test_payments_require_next_tx_count() {
    let hub = setup().await;
    deposit_and_confirm(&hub, eth(1), eth(10)).await;

    let tip = PaymentArgs {
        recipient: Party::Hub,
        amount_wei: U256::ZERO,
        amount_token: eth(2),
    };
    let row = pay(&hub, tip.clone(), 3).await.expect("payment").expect("applied");
    assert_eq!(row.state.state.tx_count_global, 3);
    assert_eq!(row.state.state.balance_token_user, eth(8));
    assert_eq!(row.state.state.balance_token_hub, eth(52));

    // Replay and gap are both stale
    assert!(matches!(pay(&hub, tip.clone(), 3).await, Err(HubError::Validation(_))));
    assert!(matches!(pay(&hub, tip.clone(), 5).await, Err(HubError::Validation(_))));

    let latest = hub.channels.latest_state(hub.user_address()).await.expect("latest");
    assert_eq!(latest.state.tx_count_global, 3);
}

#[tokio::test]
async fn test_payment_overdraft_rejected() {
    let hub = setup().await;
    deposit_and_confirm(&hub, eth(1), eth(10)).await;

    let too_much = PaymentArgs {
        recipient: Party::Hub,
        amount_wei: U256::ZERO,
        amount_token: eth(11),
    };
    assert!(matches!(pay(&hub, too_much, 3).await, Err(HubError::Validation(_))));
}

#[tokio::test]
async fn test_payment_signed_by_wrong_key_rejected() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, eth(1), eth(10)).await;

    let args = PaymentArgs {
        recipient: Party::Hub,
        amount_wei: U256::ZERO,
        amount_token: eth(1),
    };
    let latest = hub.channels.latest_state(user).await.expect("latest");
    let state = state_generator::payment(&latest.state, &args).expect("payment state");
    let forged = hub.signer.sign_state(&state).expect("hub signs");

    let result = hub
        .channels
        .apply_update(
            user,
            UpdateRequest {
                args: UpdateArgs::Payment(args),
                tx_count: 3,
                sig_user: Some(forged),
            },
        )
        .await;
    assert!(matches!(result, Err(HubError::Validation(_))));
}

#[tokio::test]
async fn test_client_confirm_pending_is_fatal() {
    let hub = setup().await;

    let result = hub
        .channels
        .apply_update(
            hub.user_address(),
            UpdateRequest {
                args: UpdateArgs::ConfirmPending(ConfirmPendingArgs {
                    transaction_hash: B256::repeat_byte(0x01),
                }),
                tx_count: 1,
                sig_user: None,
            },
        )
        .await;
    let err = result.expect_err("refused");
    assert!(matches!(err, HubError::Fatal(_)));
}

#[tokio::test]
async fn test_update_without_proposal_is_dropped() {
    let hub = setup().await;
    let user = hub.user_address();

    let proposal = hub
        .channels
        .request_deposit(user, eth(1), U256::ZERO)
        .await
        .expect("request deposit")
        .expect("proposal");
    accept(&hub, &proposal).await.expect("applied");

    // Same update again: the proposal was consumed and txCount moved on
    let sig = hub.user.sign_state(&proposal.state).expect("sign");
    let duplicate = hub
        .channels
        .apply_update(
            user,
            UpdateRequest {
                args: proposal.args.clone(),
                tx_count: 2,
                sig_user: Some(sig),
            },
        )
        .await
        .expect("duplicate handled");
    assert!(duplicate.is_none());
}

#[tokio::test]
async fn test_expired_proposal_is_dropped() {
    let mut config = payment_hub::config::HubConfig::new(contract_address());
    config.onchain.poll_after_commit = false;
    config.pending_update_ttl = std::time::Duration::from_millis(50);
    let hub = TestHub::with_config(config).await;
    insert_rate(&hub.ledger, dec!(100), Duration::minutes(1)).await;

    let proposal = hub
        .channels
        .request_deposit(hub.user_address(), eth(1), U256::ZERO)
        .await
        .expect("request deposit")
        .expect("proposal");
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    assert!(accept(&hub, &proposal).await.is_none());
    let latest = hub.channels.latest_state(hub.user_address()).await.expect("latest");
    assert_eq!(latest.state.tx_count_global, 0);
}

/// Low hub collateral is topped up through hubAuthorizedUpdate, confirmed by
/// the completion callback
#[tokio::test]
async fn test_collateral_deposit_confirmed_by_callback() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, U256::from(SMALL_DEPOSIT_WEI), U256::ZERO).await;

    let proposal = hub
        .channels
        .collateralize_if_necessary(user)
        .await
        .expect("collateralize")
        .expect("proposal");
    assert_eq!(proposal.authorization, PendingAuthorization::HubAuthorized);
    match &proposal.args {
        UpdateArgs::ProposePendingDeposit(args) => assert_eq!(args.deposit_token_hub, eth(9)),
        other => panic!("unexpected proposal {:?}", other),
    }

    let applied = accept(&hub, &proposal).await.expect("applied");
    let logical_id = applied.onchain_tx_logical_id.expect("linked transaction");
    let tx = hub.transaction(logical_id).await;
    assert_eq!(tx.state, TransactionState::New.as_str());
    assert!(tx.meta.contains("ChannelsService.onHubAuthorizedUpdateComplete"));

    hub.transactions.poll().await.expect("poll");
    hub.chain.mine(tx_hash(&tx), true);
    hub.transactions.poll().await.expect("poll");

    let latest = hub.channels.latest_state(user).await.expect("latest");
    assert_eq!(latest.state.tx_count_global, 4);
    assert!(!latest.state.has_pending_ops());
    assert_eq!(latest.state.balance_token_hub, eth(10));

    let history = hub.channels.channel_updates_since(user, 3).await.expect("history");
    match &history[0].args {
        UpdateArgs::ConfirmPending(args) => assert_eq!(args.transaction_hash, tx_hash(&tx)),
        other => panic!("unexpected update {:?}", other),
    }

    // Enough collateral now
    assert!(hub
        .channels
        .collateralize_if_necessary(user)
        .await
        .expect("collateralize")
        .is_none());
}

/// A reverted hubAuthorizedUpdate is rolled back by an invalidation
#[tokio::test]
async fn test_failed_collateral_deposit_invalidated_by_callback() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, U256::from(SMALL_DEPOSIT_WEI), U256::ZERO).await;

    let proposal = hub
        .channels
        .collateralize_if_necessary(user)
        .await
        .expect("collateralize")
        .expect("proposal");
    let applied = accept(&hub, &proposal).await.expect("applied");
    let tx = hub
        .transaction(applied.onchain_tx_logical_id.expect("linked transaction"))
        .await;

    hub.transactions.poll().await.expect("poll");
    hub.chain.mine(tx_hash(&tx), false);
    hub.transactions.poll().await.expect("poll");

    let latest = hub.channels.latest_state(user).await.expect("latest");
    assert_eq!(latest.state.tx_count_global, 4);
    assert!(!latest.state.has_pending_ops());
    assert_eq!(latest.state.balance_token_hub, eth(1));
    assert_eq!(latest.state.tx_count_chain, 1);

    let history = hub.channels.channel_updates_since(user, 2).await.expect("history");
    assert_eq!(history.len(), 2);
    assert!(history[0].invalid);
    match &history[1].args {
        UpdateArgs::Invalidation(args) => {
            assert_eq!(args.previous_valid_tx_count, 2);
            assert_eq!(args.last_invalid_tx_count, 3);
            assert_eq!(args.reason, InvalidationReason::TransactionFailed);
            assert_eq!(args.message.as_deref(), Some("EVM revert"));
        }
        other => panic!("unexpected update {:?}", other),
    }
}

/// Never invalidate while the linked transaction may still be mined
#[tokio::test]
async fn test_invalidation_refused_while_transaction_submitted() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, U256::from(SMALL_DEPOSIT_WEI), U256::ZERO).await;

    let proposal = hub
        .channels
        .collateralize_if_necessary(user)
        .await
        .expect("collateralize")
        .expect("proposal");
    accept(&hub, &proposal).await.expect("applied");
    hub.transactions.poll().await.expect("poll");

    // Even past the state timeout
    hub.chain.set_block_timestamp(CHAIN_START + 10_000);
    let result = hub
        .channels
        .apply_update(user, invalidation(&hub, 2, 3, InvalidationReason::Timeout).await)
        .await
        .expect("invalidation handled");
    assert!(result.is_none());

    let latest = hub.channels.latest_state(user).await.expect("latest");
    assert_eq!(latest.state.tx_count_global, 3);
    assert!(latest.state.has_pending_ops());
}

/// A transaction that never left the ledger is abandoned by the invalidation
#[tokio::test]
async fn test_invalidation_abandons_unsent_transaction() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, U256::from(SMALL_DEPOSIT_WEI), U256::ZERO).await;

    let proposal = hub
        .channels
        .collateralize_if_necessary(user)
        .await
        .expect("collateralize")
        .expect("proposal");
    let applied = accept(&hub, &proposal).await.expect("applied");
    let logical_id = applied.onchain_tx_logical_id.expect("linked transaction");

    let early = hub
        .channels
        .apply_update(user, invalidation(&hub, 2, 3, InvalidationReason::Rejected).await)
        .await
        .expect("invalidation handled");
    assert!(early.is_none());

    hub.chain.set_block_timestamp(CHAIN_START + 601);
    let row = hub
        .channels
        .apply_update(user, invalidation(&hub, 2, 3, InvalidationReason::Rejected).await)
        .await
        .expect("invalidation")
        .expect("applied");
    assert_eq!(row.state.state.tx_count_global, 4);
    assert_eq!(row.state.state.balance_token_hub, eth(1));

    let tx = hub.transaction(logical_id).await;
    assert_eq!(tx.state, TransactionState::Failed.as_str());
    assert_eq!(tx.failed_reason.as_deref(), Some("abandoned by invalidation"));

    // Nothing left to broadcast
    hub.transactions.poll().await.expect("poll");
    assert_eq!(hub.chain.sent_count(), 0);
}

/// A user-broadcast deposit that never landed is invalidated after its timeout
#[tokio::test]
async fn test_user_deposit_invalidated_after_timeout() {
    let hub = setup().await;
    let user = hub.user_address();

    let proposal = hub
        .channels
        .request_deposit(user, eth(1), U256::ZERO)
        .await
        .expect("request deposit")
        .expect("proposal");
    accept(&hub, &proposal).await.expect("applied");

    let early = hub
        .channels
        .apply_update(user, invalidation(&hub, 0, 1, InvalidationReason::Timeout).await)
        .await
        .expect("invalidation handled");
    assert!(early.is_none());

    hub.chain.set_block_timestamp(CHAIN_START + 601);
    let row = hub
        .channels
        .apply_update(user, invalidation(&hub, 0, 1, InvalidationReason::Timeout).await)
        .await
        .expect("invalidation")
        .expect("applied");
    let state = &row.state.state;
    assert_eq!(state.tx_count_global, 2);
    assert_eq!(state.tx_count_chain, 0);
    assert!(!state.has_pending_ops());
    assert_eq!(
        ChannelState {
            tx_count_global: 0,
            ..state.clone()
        },
        ChannelState::empty(contract_address(), user)
    );

    let history = hub.channels.channel_updates_since(user, 0).await.expect("history");
    assert!(history[0].invalid);
    assert!(!history[1].invalid);
}

#[tokio::test]
async fn test_invalidation_without_pending_rejected() {
    let hub = setup().await;
    deposit_and_confirm(&hub, eth(1), U256::ZERO).await;

    let result = hub
        .channels
        .apply_update(hub.user_address(), invalidation(&hub, 1, 2, InvalidationReason::Rejected).await)
        .await;
    assert!(matches!(result, Err(HubError::Validation(_))));
}

/// Clients must sign their invalidations; only the hub's failure path skips it
#[tokio::test]
async fn test_unsigned_client_invalidation_rejected() {
    let hub = setup().await;
    let user = hub.user_address();

    let proposal = hub
        .channels
        .request_deposit(user, eth(1), U256::ZERO)
        .await
        .expect("request deposit")
        .expect("proposal");
    accept(&hub, &proposal).await.expect("applied");
    hub.chain.set_block_timestamp(CHAIN_START + 601);

    let mut request = invalidation(&hub, 0, 1, InvalidationReason::Timeout).await;
    request.sig_user = None;
    let result = hub.channels.apply_update(user, request).await;
    assert!(matches!(result, Err(HubError::Validation(_))));

    let latest = hub.channels.latest_state(user).await.expect("latest");
    assert_eq!(latest.state.tx_count_global, 1);
    assert!(latest.state.has_pending_ops());
}

/// Withdrawal sends the hub's excess collateral out alongside the user's wei
#[tokio::test]
async fn test_withdrawal_rebalances_hub_collateral() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, eth(1), U256::ZERO).await;

    let proposal = hub
        .channels
        .request_withdrawal(
            user,
            WithdrawalRequest {
                recipient: user,
                withdrawal_wei_user: eth(1),
                tokens_to_sell: U256::ZERO,
                withdrawal_token_user: U256::ZERO,
            },
        )
        .await
        .expect("request withdrawal")
        .expect("proposal");
    assert_eq!(proposal.authorization, PendingAuthorization::HubAuthorized);
    match &proposal.args {
        UpdateArgs::ProposePendingWithdrawal(args) => {
            assert_eq!(args.withdrawal_token_hub, eth(40));
            assert_eq!(args.deposit_token_hub, U256::ZERO);
            assert_eq!(args.withdrawal_wei_user, eth(1));
        }
        other => panic!("unexpected proposal {:?}", other),
    }

    let applied = accept(&hub, &proposal).await.expect("applied");
    assert_eq!(applied.state.state.pending_withdrawal_wei_user, eth(1));
    let tx = hub
        .transaction(applied.onchain_tx_logical_id.expect("linked transaction"))
        .await;

    hub.transactions.poll().await.expect("poll");
    hub.chain.mine(tx_hash(&tx), true);
    hub.transactions.poll().await.expect("poll");

    let latest = hub.channels.latest_state(user).await.expect("latest");
    assert!(!latest.state.has_pending_ops());
    assert_eq!(latest.state.balance_wei_user, U256::ZERO);
    assert_eq!(latest.state.balance_token_hub, eth(10));
}

#[tokio::test]
async fn test_withdrawal_over_balance_rejected() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, eth(1), eth(5)).await;

    let result = hub
        .channels
        .request_withdrawal(
            user,
            WithdrawalRequest {
                recipient: user,
                withdrawal_wei_user: U256::ZERO,
                tokens_to_sell: eth(3),
                withdrawal_token_user: eth(3),
            },
        )
        .await;
    assert!(matches!(result, Err(HubError::Validation(_))));
}

#[tokio::test]
async fn test_threads_disabled() {
    let hub = setup().await;
    let user = hub.user_address();
    deposit_and_confirm(&hub, eth(1), eth(5)).await;

    let result = hub
        .channels
        .apply_update(
            user,
            UpdateRequest {
                args: UpdateArgs::OpenThread(ThreadArgs {
                    sender: user,
                    receiver: contract_address(),
                    thread_id: 1,
                    balance_wei_sender: U256::ZERO,
                    balance_token_sender: eth(1),
                }),
                tx_count: 3,
                sig_user: None,
            },
        )
        .await;
    assert!(matches!(result, Err(HubError::Validation(_))));
}

#[tokio::test]
async fn test_collateral_sync_proposes_for_active_channels() {
    let hub = setup().await;
    deposit_and_confirm(&hub, U256::from(SMALL_DEPOSIT_WEI), U256::ZERO).await;

    let proposed = sync_collateral(
        &hub.ledger,
        &hub.channels,
        std::time::Duration::from_secs(600),
    )
    .await
    .expect("sync collateral");
    assert_eq!(proposed, 1);

    let pending = hub
        .channels
        .pending_update(hub.user_address())
        .await
        .expect("pending")
        .expect("proposal cached");
    assert_eq!(pending.authorization, PendingAuthorization::HubAuthorized);
}
