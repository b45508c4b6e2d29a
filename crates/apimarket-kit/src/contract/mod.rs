//! Typed client for the marketplace contract.
//!
//! - [`MarketplaceContract`]: binds the contract address to a
//!   [`WalletSigner`](crate::WalletSigner) and exposes the read calls
//! - [`MarketCall`]: the state-mutating calls, submitted through
//!   [`MarketplaceContract::submit`]
//! - [`TransactionHandle`]: returned immediately on submit; await it (or
//!   call [`wait`](TransactionHandle::wait)) for the receipt
//!
//! # Example
//!
//! ```rust,no_run
//! # use apimarket_kit::*;
//! # async fn example(contract: &MarketplaceContract) -> Result<(), ContractError> {
//! let count = contract.listing_count().await?;
//! println!("{} listings", count);
//!
//! let handle = contract.submit(&MarketCall::UseAccess { listing_id: 0 }, None).await?;
//! println!("sent {}", handle.hash());
//! let receipt = handle.await?;
//! println!("mined in block {:?}", receipt.block_number);
//! # Ok(())
//! # }
//! ```

pub mod abi;
mod client;
mod transaction;

pub use client::{DEFAULT_RECEIPT_POLL_INTERVAL, MarketCall, MarketplaceContract, RawListing};
pub use transaction::{TransactionHandle, TransactionReceipt};
