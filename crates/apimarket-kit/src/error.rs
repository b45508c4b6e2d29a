//! Error types for apimarket-kit.
//!
//! # Error Hierarchy
//!
//! - [`Error`](enum@Error): Session-level error, the only error type returned
//!   by [`MarketplaceSession`](crate::MarketplaceSession)
//!   - [`ProviderError`]: Wallet / node request failures (transport, JSON-RPC,
//!     user rejection)
//!   - [`ContractError`]: Contract call failures (decode, revert)
//!   - [`ParseAmountError`]: Invalid numeric user input
//!
//! Provider and contract errors never cross the session boundary as-is: the
//! session converts them into [`Error::ReadFailure`] (reads) or
//! [`Error::TransactionFailed`] (writes), keeping the original message.
//!
//! # Example
//!
//! ```rust,no_run
//! use apimarket_kit::*;
//!
//! # async fn example(session: &MarketplaceSession) {
//! match session.use_access(3).await {
//!     Ok(receipt) => println!("Used access in {}", receipt.transaction_hash),
//!     Err(Error::UnknownListing(id)) => println!("Listing {} does not exist", id),
//!     Err(Error::OperationInProgress(kind)) => println!("Still waiting on {}", kind),
//!     Err(e) => println!("Failed: {}", e),
//! }
//! # }
//! ```

use alloy_primitives::B256;
use thiserror::Error;

use crate::types::OperationKind;

/// Error parsing a token amount or other non-negative integer input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseAmountError {
    #[error("Amount is empty")]
    Empty,

    #[error("Amount '{0}' is negative")]
    Negative(String),

    #[error("Amount '{0}' is not a whole number")]
    NotInteger(String),

    #[error("Amount '{0}' has more than 18 decimal places")]
    TooManyDecimals(String),

    #[error("Invalid amount format: '{0}'")]
    InvalidFormat(String),

    #[error("Amount overflow: value too large")]
    Overflow,

    #[error("Amount '{0}' is beyond exact float precision; pass an integer or a string")]
    Imprecise(String),
}

// ============================================================================
// Provider Errors
// ============================================================================

/// EIP-1193 code for a request the user rejected.
pub const USER_REJECTED_CODE: i64 = 4001;
/// EIP-1193 code for a method/account the dapp is not authorized for.
pub const UNAUTHORIZED_CODE: i64 = 4100;
/// EIP-1193 code for a provider disconnected from all chains.
pub const DISCONNECTED_CODE: i64 = 4900;
/// EIP-1193 code for a provider disconnected from the requested chain.
pub const CHAIN_DISCONNECTED_CODE: i64 = 4901;

/// Errors raised by a [`WalletProvider`](crate::WalletProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    // ─── Network/Transport ───
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {message}")]
    Network {
        message: String,
        status_code: Option<u16>,
        retryable: bool,
    },

    #[error("Timeout after {0} attempts")]
    Timeout(u32),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // ─── Wallet ───
    #[error("User rejected the request")]
    UserRejected,

    #[error("Wallet has not authorized this account or method")]
    Unauthorized,

    #[error("Wallet is disconnected")]
    Disconnected,

    // ─── Generic RPC Error ───
    #[error("RPC error: {message} (code: {code})")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

impl ProviderError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            ProviderError::Timeout(_) => true,
            ProviderError::Network { retryable, .. } => *retryable,
            // EVM nodes use -32000 for reverts and nonce/balance failures
            ProviderError::Rpc { code, .. } => *code == -32603,
            _ => false,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>, status_code: Option<u16>, retryable: bool) -> Self {
        ProviderError::Network {
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Map a JSON-RPC / EIP-1193 error object to a typed error.
    pub fn from_rpc(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        match code {
            USER_REJECTED_CODE => ProviderError::UserRejected,
            UNAUTHORIZED_CODE => ProviderError::Unauthorized,
            DISCONNECTED_CODE | CHAIN_DISCONNECTED_CODE => ProviderError::Disconnected,
            _ => ProviderError::Rpc {
                code,
                message: message.into(),
                data,
            },
        }
    }
}

// ============================================================================
// Contract Errors
// ============================================================================

/// Errors from [`MarketplaceContract`](crate::MarketplaceContract) calls.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Failed to decode {method} return data: {message}")]
    Decode {
        method: &'static str,
        message: String,
    },

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("Contract returned {0}, which does not fit in a 64-bit listing id")]
    Overflow(String),
}

impl ContractError {
    pub(crate) fn decode(method: &'static str, err: impl std::fmt::Display) -> Self {
        ContractError::Decode {
            method,
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Main Error Type
// ============================================================================

/// Main error type for marketplace session operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // ─── Wallet ───
    #[error("No wallet provider available. Install a wallet or configure APIMARKET_RPC_URL.")]
    ProviderUnavailable,

    #[error("Wallet connection failed: {0}")]
    Connection(String),

    #[error("Wallet is not connected. Call connect() first.")]
    NotConnected,

    // ─── Client-side validation ───
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("Unknown listing id {0}")]
    UnknownListing(u64),

    #[error("Another operation is in progress: {0}")]
    OperationInProgress(OperationKind),

    // ─── External ───
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Read failed: {0}")]
    ReadFailure(String),

    // ─── Configuration ───
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if retrying `connect()` may resolve this error.
    pub fn is_recoverable_by_connect(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::NotConnected)
    }

    pub(crate) fn invalid_input(field: &'static str, reason: impl std::fmt::Display) -> Self {
        Error::InvalidInput {
            field,
            reason: reason.to_string(),
        }
    }
}
