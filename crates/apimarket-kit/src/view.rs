//! Display projections.
//!
//! Pure functions from session data to display-ready records. Nothing here
//! talks to the wallet or the chain, and 256-bit values are formatted with
//! integer arithmetic only.

use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::types::{Listing, ListingCollection, TokenAmount};

const SECONDS_PER_DAY: u64 = 86_400;

/// Status label of an active listing.
pub const ACTIVE_LABEL: &str = "Active";
/// Status label of an inactive listing.
pub const INACTIVE_LABEL: &str = "Inactive";

/// One row of a listing table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListingView {
    pub id: u64,
    pub name: String,
    /// Whole-token price, e.g. `"0.5"`.
    pub price_per_request: String,
    /// Exact smallest-unit price.
    pub price_per_request_raw: String,
    pub subscription_price: String,
    pub subscription_price_raw: String,
    /// `"30 days"` when the period is a whole number of days, otherwise
    /// `"90 seconds"`.
    pub subscription_duration: String,
    pub total_purchases: String,
    pub status: &'static str,
    pub is_active: bool,
}

impl From<&Listing> for ListingView {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id,
            name: listing.name.clone(),
            price_per_request: listing.price_per_request.to_token_string(),
            price_per_request_raw: listing.price_per_request.to_base_string(),
            subscription_price: listing.subscription_price.to_token_string(),
            subscription_price_raw: listing.subscription_price.to_base_string(),
            subscription_duration: format_duration(listing.subscription_duration),
            total_purchases: listing.total_purchases.to_string(),
            status: status_label(listing.is_active),
            is_active: listing.is_active,
        }
    }
}

/// Project every listing of a snapshot, in id order.
pub fn project_listings(listings: &ListingCollection) -> Vec<ListingView> {
    listings.iter().map(ListingView::from).collect()
}

/// `"Active"` or `"Inactive"`.
pub fn status_label(is_active: bool) -> &'static str {
    if is_active {
        ACTIVE_LABEL
    } else {
        INACTIVE_LABEL
    }
}

/// Human-readable subscription period.
pub fn format_duration(seconds: U256) -> String {
    let day = U256::from(SECONDS_PER_DAY);
    if seconds.is_zero() || seconds % day != U256::ZERO {
        let unit = if seconds == U256::from(1u64) { "second" } else { "seconds" };
        return format!("{} {}", seconds, unit);
    }
    let days = seconds / day;
    let unit = if days == U256::from(1u64) { "day" } else { "days" };
    format!("{} {}", days, unit)
}

/// Abbreviated address for banners: `0x1234...abcd`.
pub fn short_address(address: &Address) -> String {
    let full = address.to_string();
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// The connected account's token balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub address: String,
    pub short_address: String,
    /// Whole-token balance with up to 6 decimals, e.g. `"12.5 tokens"`.
    pub balance: String,
    pub balance_raw: String,
}

impl BalanceView {
    pub fn new(address: Address, balance: TokenAmount) -> Self {
        Self {
            address: address.to_string(),
            short_address: short_address(&address),
            balance: balance.to_string(),
            balance_raw: balance.to_base_string(),
        }
    }
}
