//! Marketplace contract client.

use std::time::Duration;

use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolCall, SolValue};
use tracing::debug;

use super::abi::IApiMarketplace;
use super::transaction::TransactionHandle;
use crate::error::ContractError;
use crate::provider::WalletSigner;
use crate::types::OperationKind;

/// Default interval between receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Return values of `apis(id)`, in the chain's native widths.
type ApisReturn = (String, U256, U256, U256, U256, bool);

/// Listing fields exactly as returned by the contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawListing {
    pub name: String,
    pub price_per_request: U256,
    pub subscription_price: U256,
    pub subscription_duration: U256,
    pub total_purchases: U256,
    pub is_active: bool,
}

impl From<ApisReturn> for RawListing {
    fn from(
        (name, price_per_request, subscription_price, subscription_duration, total_purchases, is_active): ApisReturn,
    ) -> Self {
        Self {
            name,
            price_per_request,
            subscription_price,
            subscription_duration,
            total_purchases,
            is_active,
        }
    }
}

/// A state-mutating marketplace call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketCall {
    RegisterListing {
        name: String,
        price_per_request: U256,
        subscription_price: U256,
        /// Seconds.
        subscription_duration: U256,
    },
    PurchaseAccess {
        listing_id: u64,
        request_count: U256,
    },
    PurchaseSubscription {
        listing_id: u64,
    },
    UseAccess {
        listing_id: u64,
    },
    WithdrawEarnings,
}

impl MarketCall {
    /// The operation this call performs.
    pub fn kind(&self) -> OperationKind {
        match self {
            MarketCall::RegisterListing { .. } => OperationKind::RegisterListing,
            MarketCall::PurchaseAccess { .. } => OperationKind::PurchaseAccess,
            MarketCall::PurchaseSubscription { .. } => OperationKind::PurchaseSubscription,
            MarketCall::UseAccess { .. } => OperationKind::UseAccess,
            MarketCall::WithdrawEarnings => OperationKind::WithdrawEarnings,
        }
    }

    /// The contract method name.
    pub fn method(&self) -> &'static str {
        match self {
            MarketCall::RegisterListing { .. } => "registerAPI",
            MarketCall::PurchaseAccess { .. } => "approveAndPurchaseAPIAccess",
            MarketCall::PurchaseSubscription { .. } => "approveAndPurchaseSubscription",
            MarketCall::UseAccess { .. } => "useAPIAccess",
            MarketCall::WithdrawEarnings => "withdrawEarnings",
        }
    }

    /// The listing this call targets, if any.
    pub fn listing_id(&self) -> Option<u64> {
        match self {
            MarketCall::PurchaseAccess { listing_id, .. }
            | MarketCall::PurchaseSubscription { listing_id }
            | MarketCall::UseAccess { listing_id } => Some(*listing_id),
            MarketCall::RegisterListing { .. } | MarketCall::WithdrawEarnings => None,
        }
    }

    /// ABI-encoded calldata (selector + arguments).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            MarketCall::RegisterListing {
                name,
                price_per_request,
                subscription_price,
                subscription_duration,
            } => SolCall::abi_encode(&IApiMarketplace::registerAPICall {
                name: name.clone(),
                pricePerRequest: *price_per_request,
                subscriptionPrice: *subscription_price,
                subscriptionDuration: *subscription_duration,
            }),
            MarketCall::PurchaseAccess {
                listing_id,
                request_count,
            } => SolCall::abi_encode(&IApiMarketplace::approveAndPurchaseAPIAccessCall {
                apiId: U256::from(*listing_id),
                numberOfRequests: *request_count,
            }),
            MarketCall::PurchaseSubscription { listing_id } => {
                SolCall::abi_encode(&IApiMarketplace::approveAndPurchaseSubscriptionCall {
                    apiId: U256::from(*listing_id),
                })
            }
            MarketCall::UseAccess { listing_id } => {
                SolCall::abi_encode(&IApiMarketplace::useAPIAccessCall {
                    apiId: U256::from(*listing_id),
                })
            }
            MarketCall::WithdrawEarnings => {
                SolCall::abi_encode(&IApiMarketplace::withdrawEarningsCall {})
            }
        }
    }
}

/// Client bound to one contract address and one signer.
///
/// Cheap to clone. A new client is built whenever the signer changes; a
/// client never follows an account switch on its own.
#[derive(Clone, Debug)]
pub struct MarketplaceContract {
    address: Address,
    signer: WalletSigner,
    receipt_poll_interval: Duration,
}

impl MarketplaceContract {
    /// Bind the contract at `address` to `signer`.
    pub fn new(address: Address, signer: WalletSigner) -> Self {
        Self {
            address,
            signer,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    /// Set how often [`TransactionHandle`]s poll for receipts.
    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    /// The contract address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The signer this client sends with.
    pub fn signer(&self) -> &WalletSigner {
        &self.signer
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Number of registered listings (`apiIdCounter()`).
    pub async fn listing_count(&self) -> Result<U256, ContractError> {
        let data = SolCall::abi_encode(&IApiMarketplace::apiIdCounterCall {});
        let ret = self.signer.call(self.address, &data).await?;
        <U256 as SolValue>::abi_decode(&ret)
            .map_err(|e| ContractError::decode("apiIdCounter", e))
    }

    /// Read one listing (`apis(id)`).
    pub async fn listing(&self, id: u64) -> Result<RawListing, ContractError> {
        let data = SolCall::abi_encode(&IApiMarketplace::apisCall { id: U256::from(id) });
        let ret = self.signer.call(self.address, &data).await?;
        <ApisReturn as SolValue>::abi_decode_params(&ret)
            .map(RawListing::from)
            .map_err(|e| ContractError::decode("apis", e))
    }

    /// Marketplace token balance of `owner` (`getUserTokenBalance(owner)`).
    pub async fn token_balance(&self, owner: Address) -> Result<U256, ContractError> {
        let data = SolCall::abi_encode(&IApiMarketplace::getUserTokenBalanceCall { user: owner });
        let ret = self.signer.call(self.address, &data).await?;
        <U256 as SolValue>::abi_decode(&ret)
            .map_err(|e| ContractError::decode("getUserTokenBalance", e))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Send a state-mutating call.
    ///
    /// Returns once the wallet has broadcast the transaction; the returned
    /// handle resolves when it is mined.
    pub async fn submit(
        &self,
        call: &MarketCall,
        value: Option<U256>,
    ) -> Result<TransactionHandle, ContractError> {
        let data = call.encode();
        let hash = self
            .signer
            .send_transaction(self.address, &data, value)
            .await?;
        debug!(method = call.method(), %hash, "submitted contract call");
        Ok(TransactionHandle::new(
            hash,
            self.signer.clone(),
            self.receipt_poll_interval,
        ))
    }
}
