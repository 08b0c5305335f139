//! Completion callback registry
//!
//! Transactions name their completion handler as "Component.method". The
//! name is resolved when the transaction is submitted, so a typo fails the
//! submitting request instead of silently dropping the completion later.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::entities::onchain_transactions;
use crate::error::HubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionCallback {
    HubAuthorizedUpdate,
    StartExit,
    EmptyChannel,
}

impl CompletionCallback {
    pub const ALL: [CompletionCallback; 3] = [
        CompletionCallback::HubAuthorizedUpdate,
        CompletionCallback::StartExit,
        CompletionCallback::EmptyChannel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionCallback::HubAuthorizedUpdate => "ChannelsService.onHubAuthorizedUpdateComplete",
            CompletionCallback::StartExit => "DisputesService.onStartExitComplete",
            CompletionCallback::EmptyChannel => "DisputesService.onEmptyChannelComplete",
        }
    }
}

impl std::fmt::Display for CompletionCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompletionCallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompletionCallback::ALL
            .into_iter()
            .find(|cb| cb.as_str() == s)
            .ok_or_else(|| format!("Unknown completion callback: {}", s))
    }
}

/// Receives a transaction once it reached `confirmed` or `failed`
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_transaction_complete(
        &self,
        callback: CompletionCallback,
        tx: &onchain_transactions::Model,
    ) -> Result<(), HubError>;
}

/// Handlers are held weakly: services own the transaction manager, and the
/// manager reaches back into them only through this registry.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<CompletionCallback, Weak<dyn CompletionHandler>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: CompletionCallback, handler: &Arc<dyn CompletionHandler>) {
        self.handlers.write().insert(callback, Arc::downgrade(handler));
        tracing::debug!(callback = %callback, "Registered completion callback");
    }

    /// Parse and check `name` against the registered handlers
    pub fn validate(&self, name: &str) -> Result<CompletionCallback, HubError> {
        let callback: CompletionCallback = name.parse().map_err(HubError::Config)?;
        if !self.handlers.read().contains_key(&callback) {
            return Err(HubError::Config(format!(
                "No handler registered for completion callback {}",
                callback
            )));
        }
        Ok(callback)
    }

    pub fn resolve(&self, callback: CompletionCallback) -> Option<Arc<dyn CompletionHandler>> {
        self.handlers.read().get(&callback).and_then(Weak::upgrade)
    }
}
