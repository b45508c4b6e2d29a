//! Core types for the marketplace client.

mod listing;
mod operation;
mod units;
mod wallet;

pub use listing::{Listing, ListingCollection, Snapshot};
pub use operation::{OperationKind, OperationStatus, PendingOperation};
pub use units::{IntoTokenAmount, TOKEN_DECIMALS, TokenAmount};
pub use wallet::{AccountsChanged, SessionState, WalletConnection};

// Re-export the EVM primitives used throughout the public API
pub use alloy_primitives::{Address, B256, U256};
