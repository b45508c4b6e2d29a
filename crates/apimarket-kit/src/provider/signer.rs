//! Account-bound signing capability.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use serde_json::json;
use tracing::debug;

use super::{WalletProvider, from_hex, request_as, to_hex};
use crate::contract::TransactionReceipt;
use crate::error::ProviderError;

/// A wallet capability bound to one account.
///
/// Obtained from [`ChainAdapter::signer`](super::ChainAdapter::signer). The
/// wallet holds the keys; this type only pins the `from` address on every
/// request, so a signer never silently follows an account switch.
#[derive(Clone)]
pub struct WalletSigner {
    address: Address,
    provider: Arc<dyn WalletProvider>,
}

impl fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl WalletSigner {
    pub(crate) fn new(address: Address, provider: Arc<dyn WalletProvider>) -> Self {
        Self { address, provider }
    }

    /// The account this signer acts for.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Read-only call (`eth_call` at `latest`). Returns the raw return data.
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let params = json!([
            {
                "from": self.address,
                "to": to,
                "data": to_hex(data),
            },
            "latest"
        ]);
        let result: String = request_as(self.provider.as_ref(), "eth_call", params).await?;
        from_hex(&result)
    }

    /// Ask the wallet to sign and broadcast a transaction.
    ///
    /// Returns as soon as the wallet hands back the transaction hash; it does
    /// not wait for inclusion.
    pub async fn send_transaction(
        &self,
        to: Address,
        data: &[u8],
        value: Option<U256>,
    ) -> Result<B256, ProviderError> {
        let mut tx = json!({
            "from": self.address,
            "to": to,
            "data": to_hex(data),
        });
        if let Some(value) = value {
            tx["value"] = json!(value);
        }

        let hash: B256 =
            request_as(self.provider.as_ref(), "eth_sendTransaction", json!([tx])).await?;
        debug!(from = %self.address, %to, %hash, "transaction sent");
        Ok(hash)
    }

    /// Fetch a transaction receipt; `None` while the transaction is pending.
    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        request_as(
            self.provider.as_ref(),
            "eth_getTransactionReceipt",
            json!([hash]),
        )
        .await
    }
}
