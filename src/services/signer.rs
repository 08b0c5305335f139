//! Hub signing key
//!
//! Channel states are signed as an EIP-191 personal message over
//! `keccak256(abi.encode(state))`; transactions are legacy-priced and
//! EIP-2718 encoded.

use alloy::{
    eips::eip2718::Encodable2718,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{keccak256, Address, Bytes, PrimitiveSignature, B256, U256},
    rpc::types::TransactionRequest,
    signers::{local::PrivateKeySigner, SignerSync},
    sol,
    sol_types::SolValue,
};
use std::str::FromStr;

use crate::error::HubError;
use crate::models::channel::ChannelState;

sol! {
    struct ChannelStateEncoding {
        address contractAddress;
        address user;
        address recipient;
        uint256[2] weiBalances;
        uint256[2] tokenBalances;
        uint256[4] pendingWeiUpdates;
        uint256[4] pendingTokenUpdates;
        uint256[2] txCount;
        bytes32 threadRoot;
        uint256 threadCount;
        uint256 timeout;
    }
}

/// Digest both parties sign
pub fn state_hash(state: &ChannelState) -> B256 {
    let encoding = ChannelStateEncoding {
        contractAddress: state.contract_address,
        user: state.user,
        recipient: state.recipient,
        weiBalances: [state.balance_wei_hub, state.balance_wei_user],
        tokenBalances: [state.balance_token_hub, state.balance_token_user],
        pendingWeiUpdates: [
            state.pending_deposit_wei_hub,
            state.pending_withdrawal_wei_hub,
            state.pending_deposit_wei_user,
            state.pending_withdrawal_wei_user,
        ],
        pendingTokenUpdates: [
            state.pending_deposit_token_hub,
            state.pending_withdrawal_token_hub,
            state.pending_deposit_token_user,
            state.pending_withdrawal_token_user,
        ],
        txCount: [U256::from(state.tx_count_global), U256::from(state.tx_count_chain)],
        threadRoot: state.thread_root,
        threadCount: U256::from(state.thread_count),
        timeout: U256::from(state.timeout),
    };
    keccak256(encoding.abi_encode())
}

/// Address that produced `signature` over `state`
pub fn recover_state_signer(state: &ChannelState, signature: &str) -> Result<Address, HubError> {
    let raw = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| HubError::validation(format!("Malformed signature: {}", e)))?;
    let sig = PrimitiveSignature::try_from(raw.as_slice())
        .map_err(|e| HubError::validation(format!("Malformed signature: {}", e)))?;

    sig.recover_address_from_msg(state_hash(state).as_slice())
        .map_err(|e| HubError::validation(format!("Signature recovery failed: {}", e)))
}

/// Fails with a validation error unless `signature` is `expected`'s over `state`
pub fn verify_state_signature(
    state: &ChannelState,
    signature: &str,
    expected: Address,
) -> Result<(), HubError> {
    let recovered = recover_state_signer(state, signature)?;
    if recovered != expected {
        return Err(HubError::validation(format!(
            "Signature is from {}, expected {}",
            recovered, expected
        )));
    }
    Ok(())
}

/// A signed, encoded transaction ready for broadcast
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: B256,
}

pub struct HubSigner {
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
}

impl HubSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        let wallet = EthereumWallet::from(signer.clone());
        Self { signer, wallet }
    }

    pub fn from_private_key(private_key: &str) -> Result<Self, HubError> {
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| HubError::Config(format!("Invalid hub private key: {}", e)))?;
        Ok(Self::new(signer))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// 0x-prefixed 65-byte signature over `state`
    pub fn sign_state(&self, state: &ChannelState) -> Result<String, HubError> {
        let sig = self
            .signer
            .sign_message_sync(state_hash(state).as_slice())
            .map_err(|e| HubError::Signing(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(sig.as_bytes())))
    }

    /// `request` must carry every legacy field (nonce, gas, gas price, chain id)
    pub async fn sign_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<SignedTransaction, HubError> {
        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| HubError::Signing(e.to_string()))?;

        Ok(SignedTransaction {
            hash: *envelope.tx_hash(),
            raw: Bytes::from(envelope.encoded_2718()),
        })
    }
}
