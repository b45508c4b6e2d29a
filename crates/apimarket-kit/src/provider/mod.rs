//! Wallet provider boundary.
//!
//! This module wraps the wallet capability the session talks through:
//!
//! - [`WalletProvider`]: The injected capability: EIP-1193 style
//!   `request(method, params)` plus a push stream of account changes
//! - [`HttpWalletProvider`]: JSON-RPC over HTTP to a node with unlocked
//!   accounts (local dev chains), with retry logic
//! - [`ChainAdapter`]: Connect / silent reconnect / signer / account-change
//!   listener on top of a provider
//! - [`WalletSigner`]: Capability bound to the connected account
//!
//! The provider is always passed in explicitly; nothing in this crate reads a
//! global wallet object. Tests substitute `sim::SimulatedChain` (feature `sim`).

mod adapter;
mod http;
mod signer;

use std::future::Future;
use std::pin::Pin;

use alloy_primitives::Address;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::error::ProviderError;

pub use adapter::{AccountsHandler, ChainAdapter};
pub use http::{HttpWalletProvider, RetryConfig};
pub use signer::WalletSigner;

/// Future returned by [`WalletProvider::request`].
pub type RequestFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, ProviderError>> + Send + 'a>>;

/// A wallet capability: request/response plus push events.
///
/// Mirrors the EIP-1193 provider contract. Methods the session relies on:
///
/// | Method | Purpose |
/// |--------|---------|
/// | `eth_requestAccounts` | Permission prompt; returns authorized accounts |
/// | `eth_accounts` | Silent check of already-authorized accounts |
/// | `eth_chainId` | Active chain id (hex quantity) |
/// | `eth_call` | Read-only contract call |
/// | `eth_sendTransaction` | Sign and broadcast; returns the tx hash |
/// | `eth_getTransactionReceipt` | Receipt, or `null` while pending |
///
/// # Example Implementation
///
/// ```rust,ignore
/// use apimarket_kit::{Address, ProviderError, RequestFuture, WalletProvider};
/// use tokio::sync::broadcast;
///
/// struct MyWallet {
///     events: broadcast::Sender<Vec<Address>>,
/// }
///
/// impl WalletProvider for MyWallet {
///     fn request<'a>(&'a self, method: &'a str, params: serde_json::Value) -> RequestFuture<'a> {
///         Box::pin(async move { forward_to_extension(method, params).await })
///     }
///
///     fn account_events(&self) -> broadcast::Receiver<Vec<Address>> {
///         self.events.subscribe()
///     }
/// }
/// ```
pub trait WalletProvider: Send + Sync {
    /// Send a request to the wallet / node.
    fn request<'a>(&'a self, method: &'a str, params: serde_json::Value) -> RequestFuture<'a>;

    /// Subscribe to `accountsChanged` notifications.
    ///
    /// Each message is the wallet's full account list; an empty list means
    /// the wallet disconnected this dapp.
    fn account_events(&self) -> broadcast::Receiver<Vec<Address>>;
}

/// Send a request and deserialize the result.
pub(crate) async fn request_as<T: DeserializeOwned>(
    provider: &dyn WalletProvider,
    method: &str,
    params: serde_json::Value,
) -> Result<T, ProviderError> {
    let value = provider.request(method, params).await?;
    serde_json::from_value(value).map_err(ProviderError::Json)
}

/// Encode bytes as `0x`-prefixed hex.
pub(crate) fn to_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// Decode a `0x`-prefixed hex string.
pub(crate) fn from_hex(s: &str) -> Result<Vec<u8>, ProviderError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits)
        .map_err(|e| ProviderError::InvalidResponse(format!("invalid hex data '{}': {}", s, e)))
}
