//! Ledger transaction scope
//!
//! Wraps a SeaORM transaction with post-commit hooks. Hooks run in
//! registration order and only after the commit succeeded; dropping a
//! `LedgerTxn` rolls the transaction back and discards its hooks.

use alloy::primitives::Address;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use std::future::Future;

/// Stored form of an address: lowercase, 0x-prefixed
pub fn address_key(address: Address) -> String {
    format!("{:#x}", address)
}

type CommitHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Clone)]
pub struct Ledger {
    db: DatabaseConnection,
}

impl Ledger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Connection for reads and single-statement writes outside a transaction
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn begin(&self) -> Result<LedgerTxn, DbErr> {
        let txn = self.db.begin().await?;
        Ok(LedgerTxn {
            txn,
            hooks: Mutex::new(Vec::new()),
        })
    }
}

pub struct LedgerTxn {
    txn: DatabaseTransaction,
    // Mutex keeps `LedgerTxn: Sync`
    hooks: Mutex<Vec<CommitHook>>,
}

impl LedgerTxn {
    /// The underlying transaction, for queries
    pub fn conn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Run `hook` once this transaction has committed
    pub fn after_commit<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.get_mut().push(Box::new(move || Box::pin(hook())));
    }

    pub async fn commit(self) -> Result<(), DbErr> {
        let LedgerTxn { txn, hooks } = self;
        txn.commit().await?;

        for hook in hooks.into_inner() {
            hook().await;
        }
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), DbErr> {
        self.txn.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_address_key_is_lowercase() {
        let address = Address::from_str("0xF39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap();
        assert_eq!(address_key(address), "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
    }

    fn assert_send_sync<T: Send + Sync>() {}

    /// `&LedgerTxn` is held across awaits inside spawned tasks
    #[test]
    fn test_ledger_txn_is_send_and_sync() {
        assert_send_sync::<LedgerTxn>();
        assert_send_sync::<Ledger>();
    }
}
