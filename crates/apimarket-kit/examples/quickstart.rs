//! Quickstart - A seller and a buyer on the API marketplace
//!
//! Covers: connect, register, purchase, use, withdraw, account switch
//!
//! Run: cargo run --features sim --example quickstart
//!
//! Runs against the in-memory simulated chain; no node or wallet needed.
//! Against a dev node, build the session with `MarketplaceSession::from_env()`
//! and set APIMARKET_RPC_URL / APIMARKET_CONTRACT_ADDRESS.
//!
//! Logs: RUST_LOG=apimarket_kit=debug cargo run --features sim --example quickstart

use std::time::Duration;

use apimarket_kit::sim::SimulatedChain;
use apimarket_kit::view::{self, BalanceView};
use apimarket_kit::*;
use tokio::sync::broadcast;

// ============================================================================
// 1. Seller registers an API
// ============================================================================

async fn seller_example(session: &MarketplaceSession) -> Result<(), Error> {
    println!("=== Seller ===\n");

    let connection = session.connect().await?;
    println!("Connected: {}", view::short_address(&connection.address));

    // 0.01 tokens per request, 5 tokens for a 30-day subscription
    let receipt = session
        .register_listing("Weather API", "0.01 tokens", "5 tokens", 30 * 86_400u64)
        .await?;
    println!("Registered in tx {}", receipt.transaction_hash);

    print_listings(session);
    Ok(())
}

// ============================================================================
// 2. Buyer purchases and uses access
// ============================================================================

async fn buyer_example(session: &MarketplaceSession, buyer: Address) -> Result<(), Error> {
    println!("\n=== Buyer ===\n");

    // Two-phase: submit, observe, then confirm
    let in_flight = session
        .begin(MarketCall::PurchaseAccess {
            listing_id: 0,
            request_count: U256::from(10u64),
        })
        .await?;
    println!("Submitted {} as {}", in_flight.kind(), in_flight.tx_hash());

    // A second mutation is rejected while the first one is pending
    if let Err(e) = session.use_access(0).await {
        println!("Rejected while pending: {e}");
    }

    in_flight.confirm().await?;
    session.refresh_listings().await?;

    session.use_access(0).await?;
    let balance = BalanceView::new(buyer, session.token_balance().await?);
    println!("Buyer {} balance: {}", balance.short_address, balance.balance);

    Ok(())
}

// ============================================================================
// 3. Seller withdraws
// ============================================================================

async fn withdraw_example(session: &MarketplaceSession, seller: Address) -> Result<(), Error> {
    println!("\n=== Withdraw ===\n");

    session.withdraw_earnings().await?;
    let balance = BalanceView::new(seller, session.token_balance().await?);
    println!("Seller {} balance: {}", balance.short_address, balance.balance);

    Ok(())
}

fn print_listings(session: &MarketplaceSession) {
    for row in view::project_listings(&session.listings()) {
        println!(
            "  #{} {:<14} {:>6} per request, {} per {} [{}]",
            row.id,
            row.name,
            row.price_per_request,
            row.subscription_price,
            row.subscription_duration,
            row.status
        );
    }
}

/// Wait until the session has rebound to `account` and reloaded listings.
async fn wait_for_account(events: &mut broadcast::Receiver<SessionEvent>, account: Address) {
    let mut switched = false;
    while let Ok(event) = events.recv().await {
        match event {
            SessionEvent::AccountChanged(connection) if connection.address == account => {
                switched = true;
            }
            SessionEvent::ListingsUpdated { .. } if switched => break,
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let chain = SimulatedChain::new();
    let [seller, buyer] = SimulatedChain::accounts();

    let session = MarketplaceSession::builder()
        .provider(chain.clone())
        .receipt_poll_interval(Duration::from_millis(50))
        .build();

    // Print events from a second observer
    let mut log = session.events();
    tokio::spawn(async move {
        while let Ok(event) = log.recv().await {
            println!("  [event] {:?}", event);
        }
    });

    seller_example(&session).await?;

    // The user switches accounts in their wallet; the session rebinds
    let mut events = session.events();
    chain.hold_transactions(true);
    chain.switch_account(buyer);
    wait_for_account(&mut events, buyer).await;

    let release = {
        let chain = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            chain.hold_transactions(false);
            chain.release_pending();
        })
    };
    buyer_example(&session, buyer).await?;
    let _ = release.await;

    chain.switch_account(seller);
    wait_for_account(&mut events, seller).await;
    withdraw_example(&session, seller).await?;

    session.shutdown();
    Ok(())
}
