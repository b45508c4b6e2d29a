//! Integration tests for apimarket-kit.
//!
//! These tests drive the public API against the in-memory
//! [`SimulatedChain`](apimarket_kit::sim::SimulatedChain).
//!
//! Run with: `cargo test --features sim --test integration`

mod adapter_integration;
mod contract_integration;
mod session_integration;

use std::time::Duration;

use apimarket_kit::sim::SimulatedChain;
use apimarket_kit::*;
use tokio::sync::broadcast;

/// Poll interval used by session tests (matches the default).
pub const POLL: Duration = Duration::from_secs(5);

/// Install a test subscriber once; `RUST_LOG=apimarket_kit=debug` shows the
/// session's logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh simulated chain and a session bound to it.
pub fn setup() -> (SimulatedChain, MarketplaceSession) {
    init_tracing();
    let chain = SimulatedChain::new();
    let session = MarketplaceSession::builder()
        .provider(chain.clone())
        .poll_interval(POLL)
        .receipt_poll_interval(Duration::from_millis(100))
        .build();
    (chain, session)
}

/// A listing as stored by the contract.
pub fn raw_listing(name: &str, price_per_request: U256) -> RawListing {
    RawListing {
        name: name.to_string(),
        price_per_request,
        subscription_price: U256::from(1000u64),
        subscription_duration: U256::from(86_400u64),
        total_purchases: U256::ZERO,
        is_active: true,
    }
}

/// Seed `count` listings owned by the first dev account.
pub fn seed_listings(chain: &SimulatedChain, count: u64) {
    let owner = SimulatedChain::accounts()[0];
    for i in 0..count {
        chain.seed_listing(owner, raw_listing(&format!("API {}", i), U256::from(100 + i)));
    }
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}
