//! Submitted transactions and their receipts.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::time::Duration;

use alloy_primitives::{B256, U64, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ContractError;
use crate::provider::WalletSigner;

/// The subset of an `eth_getTransactionReceipt` result the session uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    /// `0x1` success, `0x0` reverted; absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U256>,
}

impl TransactionReceipt {
    /// Returns true unless the receipt reports a revert.
    pub fn succeeded(&self) -> bool {
        self.status.is_none_or(|status| status == U64::from(1))
    }
}

/// A transaction the wallet has broadcast but that may not be mined yet.
///
/// Await the handle (or call [`wait`](Self::wait)) to block until the chain
/// confirms or reverts it. There is no cancellation and no timeout: a node
/// that never returns a receipt keeps the caller waiting.
///
/// ```rust,no_run
/// # use apimarket_kit::*;
/// # async fn example(handle: TransactionHandle) -> Result<(), ContractError> {
/// let hash = handle.hash();
/// let receipt = handle.await?;
/// assert_eq!(receipt.transaction_hash, hash);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TransactionHandle {
    hash: B256,
    signer: WalletSigner,
    poll_interval: Duration,
}

impl TransactionHandle {
    pub(crate) fn new(hash: B256, signer: WalletSigner, poll_interval: Duration) -> Self {
        Self {
            hash,
            signer,
            poll_interval,
        }
    }

    /// The transaction hash.
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// Poll for the receipt until the transaction is mined.
    ///
    /// Resolves to the receipt on success and to
    /// [`ContractError::Reverted`] if execution failed. Transient provider
    /// errors are logged and polling continues.
    pub async fn wait(self) -> Result<TransactionReceipt, ContractError> {
        loop {
            match self.signer.transaction_receipt(self.hash).await {
                Ok(Some(receipt)) if receipt.succeeded() => {
                    debug!(hash = %self.hash, "transaction confirmed");
                    return Ok(receipt);
                }
                Ok(Some(_)) => {
                    return Err(ContractError::Reverted { tx_hash: self.hash });
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    warn!(hash = %self.hash, error = %e, "receipt poll failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl IntoFuture for TransactionHandle {
    type Output = Result<TransactionReceipt, ContractError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
