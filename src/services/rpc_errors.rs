//! Node RPC error classification
//!
//! Retry policy for broadcast errors is decided only here. Add new node
//! messages to `RPC_ERROR_TABLE`; never special-case them at call sites.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorClass {
    /// The node already has this exact transaction; treat as a successful broadcast
    AlreadyImported,
    /// The broadcast will never succeed as-is, though an earlier broadcast might have
    Permanent,
    /// Network or load hiccup; retry unchanged
    Temporary,
    /// Not in the table; leave the transaction alone and alert
    Unknown,
}

/// Lowercase substrings of node error messages
pub const RPC_ERROR_TABLE: &[(&str, RpcErrorClass)] = &[
    ("already known", RpcErrorClass::AlreadyImported),
    ("transaction with the same hash was already imported", RpcErrorClass::AlreadyImported),
    ("known transaction", RpcErrorClass::AlreadyImported),
    ("nonce too low", RpcErrorClass::Permanent),
    ("transaction nonce is too low", RpcErrorClass::Permanent),
    ("insufficient funds", RpcErrorClass::Permanent),
    ("replacement transaction underpriced", RpcErrorClass::Permanent),
    ("transaction gas price is too low", RpcErrorClass::Temporary),
    ("invalid json rpc response", RpcErrorClass::Temporary),
    ("connection refused", RpcErrorClass::Temporary),
    ("connection reset", RpcErrorClass::Temporary),
    ("timed out", RpcErrorClass::Temporary),
    ("error sending request", RpcErrorClass::Temporary),
];

pub fn classify(message: &str) -> RpcErrorClass {
    let message = message.to_lowercase();
    RPC_ERROR_TABLE
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, class)| *class)
        .unwrap_or(RpcErrorClass::Unknown)
}
