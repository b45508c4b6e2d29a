//! Two-phase mutations: submit, then confirm.

use std::sync::Arc;

use alloy_primitives::B256;
use tracing::{info, warn};

use super::{Inner, SessionEvent};
use crate::contract::{MarketCall, TransactionHandle, TransactionReceipt};
use crate::error::Error;
use crate::types::{OperationKind, OperationStatus};

/// Releases the operation slot if submission never completes.
struct Claim<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Claim<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.settle(OperationStatus::Failed);
        }
    }
}

pub(super) async fn begin(inner: &Arc<Inner>, call: MarketCall) -> Result<InFlight, Error> {
    let kind = call.kind();
    let contract = inner.contract()?;

    if let Some(listing_id) = call.listing_id() {
        if !inner.snapshot.borrow().contains(listing_id) {
            warn!(%kind, listing_id, "rejecting operation on unknown listing");
            return Err(Error::UnknownListing(listing_id));
        }
    }

    inner.claim(kind).inspect_err(|e| warn!(%kind, error = %e, "rejecting operation"))?;
    let claim = Claim {
        inner: inner.as_ref(),
        armed: true,
    };

    match contract.submit(&call, None).await {
        Ok(handle) => {
            let tx_hash = handle.hash();
            inner.record_hash(tx_hash);
            claim.disarm();
            info!(%kind, %tx_hash, "operation submitted");
            inner.emit(SessionEvent::OperationSubmitted { kind, tx_hash });
            Ok(InFlight {
                inner: Arc::clone(inner),
                kind,
                tx_hash,
                handle: Some(handle),
            })
        }
        Err(e) => {
            drop(claim);
            let reason = e.to_string();
            warn!(%kind, error = %reason, "operation rejected");
            inner.emit(SessionEvent::OperationFailed {
                kind,
                reason: reason.clone(),
            });
            Err(Error::TransactionFailed(reason))
        }
    }
}

/// A submitted operation awaiting confirmation.
///
/// Returned by [`MarketplaceSession::begin`](super::MarketplaceSession::begin).
/// The session stays busy until [`confirm`](Self::confirm) settles it. If
/// the handle is dropped instead, the receipt is still awaited in the
/// background so the slot is released exactly when the chain settles the
/// transaction.
#[must_use = "the operation slot stays claimed until the transaction is confirmed"]
pub struct InFlight {
    inner: Arc<Inner>,
    kind: OperationKind,
    tx_hash: B256,
    handle: Option<TransactionHandle>,
}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("kind", &self.kind)
            .field("tx_hash", &self.tx_hash)
            .finish_non_exhaustive()
    }
}

impl InFlight {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn tx_hash(&self) -> B256 {
        self.tx_hash
    }

    /// Wait for the transaction to be mined and release the operation slot.
    ///
    /// Does not refresh listings; call
    /// [`refresh_listings`](super::MarketplaceSession::refresh_listings)
    /// afterwards, or use the session's convenience methods.
    pub async fn confirm(mut self) -> Result<TransactionReceipt, Error> {
        match self.handle.take() {
            Some(handle) => settle(&self.inner, self.kind, handle).await,
            None => Err(Error::TransactionFailed(format!(
                "{} {} already settled",
                self.kind, self.tx_hash
            ))),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let kind = self.kind;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _ = settle(&inner, kind, handle).await;
                });
            }
            Err(_) => inner.settle(OperationStatus::Failed),
        }
    }
}

async fn settle(
    inner: &Inner,
    kind: OperationKind,
    handle: TransactionHandle,
) -> Result<TransactionReceipt, Error> {
    let tx_hash = handle.hash();
    match handle.wait().await {
        Ok(receipt) => {
            inner.settle(OperationStatus::Confirmed);
            info!(%kind, %tx_hash, block = ?receipt.block_number, "operation confirmed");
            inner.emit(SessionEvent::OperationConfirmed { kind, tx_hash });
            Ok(receipt)
        }
        Err(e) => {
            inner.settle(OperationStatus::Failed);
            let reason = e.to_string();
            warn!(%kind, %tx_hash, error = %reason, "operation failed");
            inner.emit(SessionEvent::OperationFailed {
                kind,
                reason: reason.clone(),
            });
            Err(Error::TransactionFailed(reason))
        }
    }
}
