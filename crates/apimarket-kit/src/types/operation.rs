//! Pending state-mutating operations.

use std::fmt::{self, Display};

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// The state-mutating operations a session can issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    RegisterListing,
    PurchaseAccess,
    PurchaseSubscription,
    UseAccess,
    WithdrawEarnings,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::RegisterListing => "register listing",
            OperationKind::PurchaseAccess => "purchase access",
            OperationKind::PurchaseSubscription => "purchase subscription",
            OperationKind::UseAccess => "use access",
            OperationKind::WithdrawEarnings => "withdraw earnings",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a pending operation.
///
/// `Submitted` moves to exactly one of `Confirmed` or `Failed`; there is no
/// cancellation once a transaction has been sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Submitted,
    Confirmed,
    Failed,
}

/// An in-flight state-mutating call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// Set once the wallet has accepted and broadcast the transaction.
    pub tx_hash: Option<B256>,
}

impl PendingOperation {
    pub(crate) fn submitted(kind: OperationKind) -> Self {
        Self {
            kind,
            status: OperationStatus::Submitted,
            tx_hash: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != OperationStatus::Submitted
    }
}
