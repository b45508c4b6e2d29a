//! Listing snapshots.

use std::sync::Arc;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use super::units::TokenAmount;
use crate::contract::RawListing;

/// A registered API product, as last read from the marketplace contract.
///
/// Listings are immutable snapshots: every refresh produces new values and
/// only `id` carries identity across refreshes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Contract-assigned id, contiguous from 0.
    pub id: u64,
    pub name: String,
    /// Price of one request, in smallest token units.
    pub price_per_request: TokenAmount,
    /// Price of one subscription period, in smallest token units.
    pub subscription_price: TokenAmount,
    /// Subscription period in seconds.
    pub subscription_duration: U256,
    pub total_purchases: U256,
    pub is_active: bool,
}

impl Listing {
    /// Build a listing from the raw `apis(id)` return values.
    pub fn from_raw(id: u64, raw: RawListing) -> Self {
        Self {
            id,
            name: raw.name,
            price_per_request: TokenAmount::from_u256(raw.price_per_request),
            subscription_price: TokenAmount::from_u256(raw.subscription_price),
            subscription_duration: raw.subscription_duration,
            total_purchases: raw.total_purchases,
            is_active: raw.is_active,
        }
    }
}

/// An ordered, fully-read set of listings `0..count-1`.
///
/// A collection is only ever built from a complete batch of reads; the
/// session publishes it as an `Arc` so subscribers share one snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingCollection {
    listings: Vec<Listing>,
    version: u64,
}

impl ListingCollection {
    /// The empty collection published before the first successful refresh.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a collection from listings read in id order.
    pub fn new(listings: Vec<Listing>, version: u64) -> Self {
        debug_assert!(
            listings.iter().enumerate().all(|(i, l)| l.id == i as u64),
            "listings must be contiguous from id 0"
        );
        Self { listings, version }
    }

    /// Number of listings (the contract's counter at read time).
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Monotonic publish counter; 0 means "never refreshed".
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get a listing by id.
    pub fn get(&self, id: u64) -> Option<&Listing> {
        usize::try_from(id).ok().and_then(|i| self.listings.get(i))
    }

    /// Returns true if `id` is present in this snapshot.
    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// The listing with the highest id (the most recently registered).
    pub fn latest(&self) -> Option<&Listing> {
        self.listings.last()
    }

    /// Only listings currently accepting purchases.
    pub fn active(&self) -> impl Iterator<Item = &Listing> {
        self.listings.iter().filter(|l| l.is_active)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Listing> {
        self.listings.iter()
    }

    pub fn as_slice(&self) -> &[Listing] {
        &self.listings
    }
}

impl<'a> IntoIterator for &'a ListingCollection {
    type Item = &'a Listing;
    type IntoIter = std::slice::Iter<'a, Listing>;

    fn into_iter(self) -> Self::IntoIter {
        self.listings.iter()
    }
}

/// Shared snapshot handle, as published to subscribers.
pub type Snapshot = Arc<ListingCollection>;
