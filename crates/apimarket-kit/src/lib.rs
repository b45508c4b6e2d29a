//! A typed client session for the on-chain API marketplace.
//!
//! **apimarket-kit** wraps an injected wallet capability and the marketplace
//! contract behind one coordinating [`MarketplaceSession`]. Sellers register
//! API listings with a per-request price and a subscription offer; buyers
//! purchase request bundles or subscriptions and consume access; sellers
//! withdraw their earnings. The pricing and access rules live in the
//! contract; this crate handles connection, polling and transaction plumbing.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use apimarket_kit::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), apimarket_kit::Error> {
//!     // APIMARKET_RPC_URL points at a node with unlocked accounts
//!     let session = MarketplaceSession::from_env()?;
//!     let connection = session.connect().await?;
//!     println!("Connected as {}", view::short_address(&connection.address));
//!
//!     for listing in view::project_listings(&session.listings()) {
//!         println!("#{} {} ({}) {}", listing.id, listing.name, listing.price_per_request, listing.status);
//!     }
//!
//!     session.purchase_access(0, 10).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Design
//!
//! 1. **One session, many views**: views subscribe to listing snapshots
//!    ([`MarketplaceSession::subscribe`]) and events
//!    ([`MarketplaceSession::events`]) instead of owning connection state
//! 2. **Explicit wallet capability**: a [`WalletProvider`] is passed in, never
//!    looked up globally
//! 3. **Atomic snapshots**: a refresh publishes a complete listing set or
//!    nothing
//! 4. **One mutation at a time**: a second mutating call while one is pending
//!    fails with [`Error::OperationInProgress`]
//! 5. **Exact numbers**: token amounts stay 256-bit integers end to end
//!
//! # Core Types
//!
//! - [`MarketplaceSession`] - The coordinating session
//! - [`ChainAdapter`] - Wallet connection lifecycle
//! - [`MarketplaceContract`] - Typed contract reads and transactions
//! - [`TokenAmount`] - Token amount in the smallest unit
//! - [`Listing`], [`ListingCollection`] - Listing snapshots
//!
//! # Input Parsing
//!
//! Numeric inputs accept typed values or user strings and are validated
//! before anything reaches the wallet:
//!
//! ```
//! use apimarket_kit::{IntoTokenAmount, TokenAmount};
//!
//! assert_eq!("1.5 tokens".parse::<TokenAmount>().unwrap(), TokenAmount::base(1_500_000_000_000_000_000));
//! assert!((-1i64).into_token_amount().is_err());
//! assert!(3.5f64.into_token_amount().is_err());
//! ```

pub mod config;
pub mod contract;
pub mod error;
pub mod provider;
pub mod session;
pub mod types;
pub mod view;

// Simulated chain - only available with "sim" feature
#[cfg(any(test, feature = "sim"))]
pub mod sim;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export commonly used types at crate root
pub use config::MarketConfig;
pub use error::{ContractError, Error, ParseAmountError, ProviderError};
pub use types::*;

// Re-export provider types
pub use provider::{
    AccountsHandler, ChainAdapter, HttpWalletProvider, RequestFuture, RetryConfig, WalletProvider,
    WalletSigner,
};

// Re-export contract types
pub use contract::{MarketCall, MarketplaceContract, RawListing, TransactionHandle, TransactionReceipt};

// Re-export session types
pub use session::{InFlight, MarketplaceSession, SessionBuilder, SessionEvent};

// Re-export view types
pub use view::{BalanceView, ListingView};

/// Lock a mutex, ignoring poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
