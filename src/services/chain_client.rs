//! Chain client boundary
//!
//! `ChainClient` is everything the hub asks of a node. `AlloyChainClient`
//! is the JSON-RPC implementation; tests script their own.

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::TransactionRequest,
    sol,
    sol_types::SolCall,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::models::channel::ChannelState;

// Channel manager contract, restricted to what the hub calls
sol! {
    #[sol(rpc)]
    interface IChannelManager {
        function hubAuthorizedUpdate(
            address user,
            address recipient,
            uint256[2] weiBalances,
            uint256[2] tokenBalances,
            uint256[4] pendingWeiUpdates,
            uint256[4] pendingTokenUpdates,
            uint256[2] txCount,
            bytes32 threadRoot,
            uint256 threadCount,
            uint256 timeout,
            string sigUser
        ) external;

        function startExit(address user) external;

        function emptyChannel(address user) external;

        function challengePeriod() external view returns (uint256);

        function getChannelDetails(address user) external view returns (uint256 channelClosingTime, uint8 status);
    }
}

/// On-chain channel status as reported by `getChannelDetails`
pub const CHAIN_STATUS_OPEN: u8 = 0;
pub const CHAIN_STATUS_CHANNEL_DISPUTE: u8 = 1;

/// Any failure talking to the node. The message is kept verbatim so the
/// RPC error table can classify it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ChainError {
    pub message: String,
}

impl ChainError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: B256,
    /// None while in the mempool
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    /// Execution status; false means the EVM reverted
    pub status: bool,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub transaction_index: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainChannelDetails {
    /// Unix seconds at which the current on-chain dispute was last (re)started
    pub channel_closing_time: u64,
    pub status: u8,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Next nonce for `address` according to the node
    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, ChainError>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError>;

    async fn get_transaction(&self, hash: B256) -> Result<Option<ChainTransaction>, ChainError>;

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<ChainReceipt>, ChainError>;

    /// Timestamp of the latest block
    async fn latest_block_timestamp(&self) -> Result<u64, ChainError>;

    /// Current node gas price in wei
    async fn gas_price(&self) -> Result<u128, ChainError>;

    async fn challenge_period(&self, contract: Address) -> Result<u64, ChainError>;

    async fn channel_details(
        &self,
        contract: Address,
        user: Address,
    ) -> Result<ChainChannelDetails, ChainError>;
}

/// Calldata for `hubAuthorizedUpdate(state, sigUser)`
pub fn encode_hub_authorized_update(state: &ChannelState, sig_user: &str) -> Bytes {
    let call = IChannelManager::hubAuthorizedUpdateCall {
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
        sigUser: sig_user.to_string(),
    };
    Bytes::from(call.abi_encode())
}

pub fn encode_start_exit(user: Address) -> Bytes {
    Bytes::from(IChannelManager::startExitCall { user }.abi_encode())
}

pub fn encode_empty_channel(user: Address) -> Bytes {
    Bytes::from(IChannelManager::emptyChannelCall { user }.abi_encode())
}

/// JSON-RPC chain client
pub struct AlloyChainClient {
    provider: RootProvider<Http<Client>>,
}

impl AlloyChainClient {
    /// Connect to `rpc_url` and verify the node answers
    pub async fn new(rpc_url: &str) -> Result<Self, ChainError> {
        info!(rpc_url = %rpc_url, "Initializing AlloyChainClient");

        let provider = ProviderBuilder::new().on_http(
            rpc_url
                .parse()
                .map_err(|e| ChainError::new(format!("Invalid RPC URL: {}", e)))?,
        );

        let chain_id = provider.get_chain_id().await.map_err(|e| {
            error!(error = %e, "Failed to connect to chain RPC");
            ChainError::new(format!("Connection failed: {}", e))
        })?;

        info!(chain_id = chain_id, "AlloyChainClient initialized successfully");

        Ok(Self { provider })
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::new(e.to_string()))
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(|e| ChainError::new(e.to_string()))
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, ChainError> {
        let gas = self
            .provider
            .estimate_gas(request)
            .await
            .map_err(|e| ChainError::new(e.to_string()))?;
        Ok(gas as u64)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| ChainError::new(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<ChainTransaction>, ChainError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| ChainError::new(e.to_string()))?;

        Ok(tx.map(|tx| ChainTransaction {
            hash,
            block_number: tx.block_number,
        }))
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<ChainReceipt>, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::new(e.to_string()))?;

        Ok(receipt.map(|r| ChainReceipt {
            status: r.status(),
            block_number: r.block_number,
            block_hash: r.block_hash,
            transaction_index: r.transaction_index,
        }))
    }

    async fn latest_block_timestamp(&self) -> Result<u64, ChainError> {
        let params = serde_json::json!(["latest", false]);
        let response: serde_json::Value = self
            .provider
            .client()
            .request("eth_getBlockByNumber", params)
            .await
            .map_err(|e| ChainError::new(format!("Failed to get latest block: {}", e)))?;

        response["timestamp"]
            .as_str()
            .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .ok_or_else(|| ChainError::new("Latest block has no timestamp"))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::new(e.to_string()))
    }

    async fn challenge_period(&self, contract: Address) -> Result<u64, ChainError> {
        let manager = IChannelManager::new(contract, &self.provider);
        let result = manager
            .challengePeriod()
            .call()
            .await
            .map_err(|e| ChainError::new(format!("challengePeriod failed: {}", e)))?;

        Ok(result._0.saturating_to::<u64>())
    }

    async fn channel_details(
        &self,
        contract: Address,
        user: Address,
    ) -> Result<ChainChannelDetails, ChainError> {
        let manager = IChannelManager::new(contract, &self.provider);
        let result = manager
            .getChannelDetails(user)
            .call()
            .await
            .map_err(|e| ChainError::new(format!("getChannelDetails failed: {}", e)))?;

        debug!(
            user = %user,
            closing_time = %result.channelClosingTime,
            status = result.status,
            "Fetched on-chain channel details"
        );

        Ok(ChainChannelDetails {
            channel_closing_time: result.channelClosingTime.saturating_to::<u64>(),
            status: result.status,
        })
    }
}
