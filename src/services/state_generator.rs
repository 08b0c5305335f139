//! Deterministic state transitions
//!
//! Every function takes the latest signed state and returns the unsigned
//! successor with `tx_count_global` advanced by one. Both the hub and the
//! user must derive byte-identical states from the same arguments, so
//! nothing here reads the clock or the ledger.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::HubError;
use crate::models::channel::ChannelState;
use crate::models::update::{
    DepositArgs, ExchangeArgs, InvalidationArgs, Party, PaymentArgs, UpdateArgs, WithdrawalArgs,
};
use crate::services::amounts::{checked_credit, checked_debit, div_rate, mul_rate};

fn debit(balance: &mut U256, amount: U256, field: &str) -> Result<(), HubError> {
    *balance = checked_debit(*balance, amount, field).map_err(HubError::Validation)?;
    Ok(())
}

fn credit(balance: &mut U256, amount: U256, field: &str) -> Result<(), HubError> {
    *balance = checked_credit(*balance, amount, field).map_err(HubError::Validation)?;
    Ok(())
}

pub fn parse_rate(raw: &str) -> Result<Decimal, HubError> {
    let rate = Decimal::from_str(raw)
        .map_err(|e| HubError::validation(format!("Invalid exchange rate '{}': {}", raw, e)))?;
    if rate <= Decimal::ZERO {
        return Err(HubError::validation(format!("Exchange rate must be positive: {}", raw)));
    }
    Ok(rate)
}

fn next(prev: &ChannelState) -> ChannelState {
    let mut state = prev.clone();
    state.tx_count_global = prev.tx_count_global + 1;
    state
}

fn require_no_pending(prev: &ChannelState) -> Result<(), HubError> {
    if prev.has_pending_ops() {
        return Err(HubError::validation(format!(
            "Channel for {} already has pending operations at txCount {}",
            prev.user, prev.tx_count_global
        )));
    }
    Ok(())
}

/// Dispatch for every reason derivable from the previous state alone
pub fn generate(prev: &ChannelState, args: &UpdateArgs) -> Result<ChannelState, HubError> {
    match args {
        UpdateArgs::Payment(args) => payment(prev, args),
        UpdateArgs::Exchange(args) => exchange(prev, args),
        UpdateArgs::ProposePendingDeposit(args) => propose_pending_deposit(prev, args),
        UpdateArgs::ProposePendingWithdrawal(args) => propose_pending_withdrawal(prev, args),
        UpdateArgs::ConfirmPending(_) => confirm_pending(prev),
        other => Err(HubError::fatal(format!(
            "{} cannot be derived from the previous state alone",
            other.reason()
        ))),
    }
}

pub fn payment(prev: &ChannelState, args: &PaymentArgs) -> Result<ChannelState, HubError> {
    let mut state = next(prev);
    match args.recipient {
        Party::Hub => {
            debit(&mut state.balance_wei_user, args.amount_wei, "balanceWeiUser")?;
            debit(&mut state.balance_token_user, args.amount_token, "balanceTokenUser")?;
            credit(&mut state.balance_wei_hub, args.amount_wei, "balanceWeiHub")?;
            credit(&mut state.balance_token_hub, args.amount_token, "balanceTokenHub")?;
        }
        Party::User => {
            debit(&mut state.balance_wei_hub, args.amount_wei, "balanceWeiHub")?;
            debit(&mut state.balance_token_hub, args.amount_token, "balanceTokenHub")?;
            credit(&mut state.balance_wei_user, args.amount_wei, "balanceWeiUser")?;
            credit(&mut state.balance_token_user, args.amount_token, "balanceTokenUser")?;
        }
    }
    Ok(state)
}

fn apply_exchange(
    state: &mut ChannelState,
    seller: Party,
    rate: Decimal,
    tokens_to_sell: U256,
    wei_to_sell: U256,
) -> Result<(), HubError> {
    let wei_for_tokens = div_rate(tokens_to_sell, rate)
        .ok_or_else(|| HubError::validation("Token amount overflows at exchange rate"))?;
    let tokens_for_wei = mul_rate(wei_to_sell, rate)
        .ok_or_else(|| HubError::validation("Wei amount overflows at exchange rate"))?;

    match seller {
        Party::User => {
            debit(&mut state.balance_token_user, tokens_to_sell, "balanceTokenUser")?;
            credit(&mut state.balance_token_hub, tokens_to_sell, "balanceTokenHub")?;
            debit(&mut state.balance_wei_hub, wei_for_tokens, "balanceWeiHub")?;
            credit(&mut state.balance_wei_user, wei_for_tokens, "balanceWeiUser")?;

            debit(&mut state.balance_wei_user, wei_to_sell, "balanceWeiUser")?;
            credit(&mut state.balance_wei_hub, wei_to_sell, "balanceWeiHub")?;
            debit(&mut state.balance_token_hub, tokens_for_wei, "balanceTokenHub")?;
            credit(&mut state.balance_token_user, tokens_for_wei, "balanceTokenUser")?;
        }
        Party::Hub => {
            debit(&mut state.balance_token_hub, tokens_to_sell, "balanceTokenHub")?;
            credit(&mut state.balance_token_user, tokens_to_sell, "balanceTokenUser")?;
            debit(&mut state.balance_wei_user, wei_for_tokens, "balanceWeiUser")?;
            credit(&mut state.balance_wei_hub, wei_for_tokens, "balanceWeiHub")?;

            debit(&mut state.balance_wei_hub, wei_to_sell, "balanceWeiHub")?;
            credit(&mut state.balance_wei_user, wei_to_sell, "balanceWeiUser")?;
            debit(&mut state.balance_token_user, tokens_for_wei, "balanceTokenUser")?;
            credit(&mut state.balance_token_hub, tokens_for_wei, "balanceTokenHub")?;
        }
    }
    Ok(())
}

pub fn exchange(prev: &ChannelState, args: &ExchangeArgs) -> Result<ChannelState, HubError> {
    let rate = parse_rate(&args.exchange_rate)?;
    let mut state = next(prev);
    apply_exchange(&mut state, args.seller, rate, args.tokens_to_sell, args.wei_to_sell)?;
    Ok(state)
}

pub fn propose_pending_deposit(
    prev: &ChannelState,
    args: &DepositArgs,
) -> Result<ChannelState, HubError> {
    require_no_pending(prev)?;

    let mut state = next(prev);
    state.pending_deposit_wei_hub = args.deposit_wei_hub;
    state.pending_deposit_wei_user = args.deposit_wei_user;
    state.pending_deposit_token_hub = args.deposit_token_hub;
    state.pending_deposit_token_user = args.deposit_token_user;
    state.recipient = prev.user;
    state.tx_count_chain = prev.tx_count_chain + 1;
    state.timeout = args.timeout;
    Ok(state)
}

/// The user first sells `tokens_to_sell`/`wei_to_sell` to the hub, then the
/// withdrawals leave the balances and become pending.
pub fn propose_pending_withdrawal(
    prev: &ChannelState,
    args: &WithdrawalArgs,
) -> Result<ChannelState, HubError> {
    require_no_pending(prev)?;
    let rate = parse_rate(&args.exchange_rate)?;

    let mut state = next(prev);
    apply_exchange(&mut state, Party::User, rate, args.tokens_to_sell, args.wei_to_sell)?;

    debit(&mut state.balance_wei_user, args.withdrawal_wei_user, "balanceWeiUser")?;
    debit(&mut state.balance_token_user, args.withdrawal_token_user, "balanceTokenUser")?;
    debit(&mut state.balance_wei_hub, args.withdrawal_wei_hub, "balanceWeiHub")?;
    debit(&mut state.balance_token_hub, args.withdrawal_token_hub, "balanceTokenHub")?;

    state.pending_withdrawal_wei_user = args.withdrawal_wei_user;
    state.pending_withdrawal_token_user = args.withdrawal_token_user;
    state.pending_withdrawal_wei_hub = args.withdrawal_wei_hub;
    state.pending_withdrawal_token_hub = args.withdrawal_token_hub;
    state.pending_deposit_wei_hub = args.deposit_wei_hub;
    state.pending_deposit_token_hub = args.deposit_token_hub;
    state.pending_deposit_wei_user = U256::ZERO;
    state.pending_deposit_token_user = U256::ZERO;

    state.recipient = args.recipient;
    state.tx_count_chain = prev.tx_count_chain + 1;
    state.timeout = args.timeout;
    Ok(state)
}

/// Pending deposits land in the balances; pending withdrawals have already left
pub fn confirm_pending(prev: &ChannelState) -> Result<ChannelState, HubError> {
    if !prev.has_pending_ops() {
        return Err(HubError::validation(format!(
            "Nothing pending to confirm for {} at txCount {}",
            prev.user, prev.tx_count_global
        )));
    }

    let mut state = next(prev);
    credit(&mut state.balance_wei_hub, prev.pending_deposit_wei_hub, "balanceWeiHub")?;
    credit(&mut state.balance_wei_user, prev.pending_deposit_wei_user, "balanceWeiUser")?;
    credit(&mut state.balance_token_hub, prev.pending_deposit_token_hub, "balanceTokenHub")?;
    credit(&mut state.balance_token_user, prev.pending_deposit_token_user, "balanceTokenUser")?;
    state.clear_pending();
    state.recipient = prev.user;
    state.timeout = 0;
    Ok(state)
}

/// Roll back to `previous_valid`, skipping past `latest`'s txCountGlobal.
/// Withdrawals still pending in `previous_valid` return to the balances.
pub fn invalidation(
    latest: &ChannelState,
    previous_valid: &ChannelState,
    args: &InvalidationArgs,
) -> Result<ChannelState, HubError> {
    if args.last_invalid_tx_count != latest.tx_count_global {
        return Err(HubError::validation(format!(
            "Invalidation must cover the latest update (txCount {}), got {}",
            latest.tx_count_global, args.last_invalid_tx_count
        )));
    }
    if previous_valid.tx_count_global != args.previous_valid_tx_count {
        return Err(HubError::fatal(format!(
            "Previous valid state has txCount {}, expected {}",
            previous_valid.tx_count_global, args.previous_valid_tx_count
        )));
    }

    let mut state = previous_valid.clone();
    credit(&mut state.balance_wei_hub, previous_valid.pending_withdrawal_wei_hub, "balanceWeiHub")?;
    credit(&mut state.balance_wei_user, previous_valid.pending_withdrawal_wei_user, "balanceWeiUser")?;
    credit(&mut state.balance_token_hub, previous_valid.pending_withdrawal_token_hub, "balanceTokenHub")?;
    credit(&mut state.balance_token_user, previous_valid.pending_withdrawal_token_user, "balanceTokenUser")?;
    state.clear_pending();
    state.recipient = previous_valid.user;
    state.tx_count_global = latest.tx_count_global + 1;
    state.tx_count_chain = previous_valid.tx_count_chain;
    state.timeout = 0;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::update::InvalidationReason;
    use alloy::primitives::Address;

    fn base() -> ChannelState {
        let mut state = ChannelState::empty(Address::repeat_byte(0xcc), Address::repeat_byte(0x01));
        state.balance_wei_hub = U256::from(1_000u64);
        state.balance_wei_user = U256::from(1_000u64);
        state.balance_token_hub = U256::from(50_000u64);
        state.balance_token_user = U256::from(10_000u64);
        state.tx_count_global = 4;
        state.tx_count_chain = 1;
        state
    }

    #[test]
    fn test_payment_moves_balances() {
        let args = PaymentArgs {
            recipient: Party::Hub,
            amount_wei: U256::from(10u64),
            amount_token: U256::from(500u64),
        };
        let state = payment(&base(), &args).unwrap();
        assert_eq!(state.tx_count_global, 5);
        assert_eq!(state.balance_wei_user, U256::from(990u64));
        assert_eq!(state.balance_token_hub, U256::from(50_500u64));
        assert_eq!(state.tx_count_chain, 1);
    }

    #[test]
    fn test_payment_overdraft_is_validation_error() {
        let args = PaymentArgs {
            recipient: Party::Hub,
            amount_wei: U256::ZERO,
            amount_token: U256::from(10_001u64),
        };
        assert!(matches!(payment(&base(), &args), Err(HubError::Validation(_))));
    }

    #[test]
    fn test_exchange_user_sells_tokens() {
        let args = ExchangeArgs {
            exchange_rate: "100".to_string(),
            seller: Party::User,
            tokens_to_sell: U256::from(5_000u64),
            wei_to_sell: U256::ZERO,
        };
        let state = exchange(&base(), &args).unwrap();
        assert_eq!(state.balance_token_user, U256::from(5_000u64));
        assert_eq!(state.balance_wei_user, U256::from(1_050u64));
        assert_eq!(state.balance_wei_hub, U256::from(950u64));
    }

    #[test]
    fn test_deposit_requires_no_pending() {
        let args = DepositArgs {
            deposit_wei_hub: U256::ZERO,
            deposit_wei_user: U256::from(100u64),
            deposit_token_hub: U256::from(7u64),
            deposit_token_user: U256::ZERO,
            timeout: 1_000,
        };
        let proposed = propose_pending_deposit(&base(), &args).unwrap();
        assert_eq!(proposed.tx_count_chain, 2);
        assert_eq!(proposed.timeout, 1_000);
        assert!(proposed.has_pending_ops());

        let err = propose_pending_deposit(&proposed, &args).unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
    }

    #[test]
    fn test_confirm_pending_applies_deposits() {
        let args = DepositArgs {
            deposit_wei_hub: U256::ZERO,
            deposit_wei_user: U256::from(100u64),
            deposit_token_hub: U256::from(7u64),
            deposit_token_user: U256::ZERO,
            timeout: 1_000,
        };
        let proposed = propose_pending_deposit(&base(), &args).unwrap();
        let confirmed = confirm_pending(&proposed).unwrap();
        assert_eq!(confirmed.tx_count_global, proposed.tx_count_global + 1);
        assert_eq!(confirmed.balance_wei_user, U256::from(1_100u64));
        assert_eq!(confirmed.balance_token_hub, U256::from(50_007u64));
        assert!(!confirmed.has_pending_ops());
        assert_eq!(confirmed.timeout, 0);
    }

    #[test]
    fn test_withdrawal_moves_balances_to_pending() {
        let args = WithdrawalArgs {
            exchange_rate: "100".to_string(),
            tokens_to_sell: U256::from(1_000u64),
            wei_to_sell: U256::ZERO,
            recipient: Address::repeat_byte(0x09),
            withdrawal_wei_user: U256::from(1_010u64),
            withdrawal_token_user: U256::ZERO,
            withdrawal_wei_hub: U256::ZERO,
            withdrawal_token_hub: U256::from(40_000u64),
            deposit_wei_hub: U256::ZERO,
            deposit_token_hub: U256::ZERO,
            timeout: 99,
        };
        let state = propose_pending_withdrawal(&base(), &args).unwrap();
        assert_eq!(state.balance_wei_user, U256::ZERO);
        assert_eq!(state.balance_token_user, U256::from(9_000u64));
        assert_eq!(state.balance_token_hub, U256::from(11_000u64));
        assert_eq!(state.pending_withdrawal_wei_user, U256::from(1_010u64));
        assert_eq!(state.recipient, Address::repeat_byte(0x09));
    }

    #[test]
    fn test_invalidation_restores_previous_balances() {
        let prev = base();
        let args = DepositArgs {
            deposit_wei_hub: U256::ZERO,
            deposit_wei_user: U256::from(100u64),
            deposit_token_hub: U256::ZERO,
            deposit_token_user: U256::ZERO,
            timeout: 10,
        };
        let latest = propose_pending_deposit(&prev, &args).unwrap();
        let inv = InvalidationArgs {
            previous_valid_tx_count: prev.tx_count_global,
            last_invalid_tx_count: latest.tx_count_global,
            reason: InvalidationReason::Timeout,
            message: None,
        };
        let state = invalidation(&latest, &prev, &inv).unwrap();
        assert_eq!(state.tx_count_global, latest.tx_count_global + 1);
        assert_eq!(state.tx_count_chain, prev.tx_count_chain);
        assert_eq!(state.balance_wei_user, prev.balance_wei_user);
        assert!(!state.has_pending_ops());
    }

    #[test]
    fn test_invalid_rate_rejected() {
        assert!(parse_rate("0").is_err());
        assert!(parse_rate("-1").is_err());
        assert!(parse_rate("abc").is_err());
        assert_eq!(parse_rate("123.45").unwrap(), Decimal::from_str("123.45").unwrap());
    }
}
