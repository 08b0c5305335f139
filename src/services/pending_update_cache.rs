//! Single-slot pending update cache
//!
//! Holds the one unsigned update the hub has proposed to a user and is
//! waiting on a countersignature for. The slot is advisory: the ledger's
//! latest signed state is always re-checked when the countersigned update
//! comes back, so a lost entry only costs the user a fresh proposal.
//!
//! A second proposal while the slot is occupied is rejected with
//! `HubError::PendingUpdateExists`; the first proposal stays live until it
//! is consumed or expires.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::HubError;
use crate::ledger::address_key;
use crate::models::update::UpdateArgs;

/// Who broadcasts the on-chain part, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingAuthorization {
    /// The user submits the on-chain transaction
    UserAuthorized,
    /// The hub submits `hubAuthorizedUpdate` once countersigned
    HubAuthorized,
    /// No on-chain part
    Offchain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    pub authorization: PendingAuthorization,
    pub args: UpdateArgs,
    /// txCountGlobal the countersigned state must carry
    pub tx_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PendingUpdateCache {
    cache: Cache<String, PendingUpdate>,
}

impl PendingUpdateCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    fn key(user: Address) -> String {
        format!("pending-update:{}", address_key(user))
    }

    /// Store a proposal in `user`'s empty slot
    pub async fn propose(
        &self,
        user: Address,
        authorization: PendingAuthorization,
        args: UpdateArgs,
        tx_count: u64,
    ) -> Result<PendingUpdate, HubError> {
        let update = PendingUpdate {
            authorization,
            args,
            tx_count,
            created_at: Utc::now(),
        };

        let entry = self
            .cache
            .entry(Self::key(user))
            .or_insert_with(async { update.clone() })
            .await;

        if !entry.is_fresh() {
            let existing = entry.into_value();
            warn!(
                user = %user,
                existing_reason = %existing.args.reason(),
                existing_tx_count = existing.tx_count,
                rejected_reason = %update.args.reason(),
                "Pending update slot already occupied"
            );
            return Err(HubError::PendingUpdateExists {
                user: user.to_string(),
            });
        }

        debug!(
            user = %user,
            reason = %update.args.reason(),
            tx_count = tx_count,
            "Stored pending update"
        );
        Ok(update)
    }

    pub async fn get(&self, user: Address) -> Option<PendingUpdate> {
        self.cache.get(&Self::key(user)).await
    }

    /// Free the slot; called only after the countersigned update committed
    pub async fn consume(&self, user: Address) {
        self.cache.invalidate(&Self::key(user)).await;
        debug!(user = %user, "Consumed pending update");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::update::{ExchangeArgs, Party};
    use alloy::primitives::U256;

    fn exchange_args(tokens: u64) -> UpdateArgs {
        UpdateArgs::Exchange(ExchangeArgs {
            exchange_rate: "100".to_string(),
            seller: Party::User,
            tokens_to_sell: U256::from(tokens),
            wei_to_sell: U256::ZERO,
        })
    }

    #[tokio::test]
    async fn test_second_proposal_is_rejected() {
        let cache = PendingUpdateCache::new(Duration::from_secs(300));
        let user = Address::repeat_byte(0x01);

        cache
            .propose(user, PendingAuthorization::Offchain, exchange_args(1), 5)
            .await
            .unwrap();
        let err = cache
            .propose(user, PendingAuthorization::HubAuthorized, exchange_args(2), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::PendingUpdateExists { .. }));

        let live = cache.get(user).await.unwrap();
        assert_eq!(live.args, exchange_args(1));
        assert_eq!(live.authorization, PendingAuthorization::Offchain);
    }

    #[tokio::test]
    async fn test_consume_frees_slot() {
        let cache = PendingUpdateCache::new(Duration::from_secs(300));
        let user = Address::repeat_byte(0x02);

        cache
            .propose(user, PendingAuthorization::Offchain, exchange_args(1), 5)
            .await
            .unwrap();
        cache.consume(user).await;
        assert!(cache.get(user).await.is_none());

        cache
            .propose(user, PendingAuthorization::Offchain, exchange_args(2), 6)
            .await
            .unwrap();
        assert_eq!(cache.get(user).await.unwrap().tx_count, 6);
    }

    #[tokio::test]
    async fn test_slots_are_per_user() {
        let cache = PendingUpdateCache::new(Duration::from_secs(300));
        for byte in 1..=3u8 {
            cache
                .propose(
                    Address::repeat_byte(byte),
                    PendingAuthorization::Offchain,
                    exchange_args(byte as u64),
                    1,
                )
                .await
                .unwrap();
        }
        assert!(cache.get(Address::repeat_byte(3)).await.is_some());
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let cache = PendingUpdateCache::new(Duration::from_millis(50));
        let user = Address::repeat_byte(0x04);

        cache
            .propose(user, PendingAuthorization::Offchain, exchange_args(1), 5)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get(user).await.is_none());
    }
}
