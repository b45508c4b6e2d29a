//! Marketplace session behavior: snapshots, polling, serialized mutations
//! and account changes.

use std::sync::Arc;
use std::time::Duration;

use apimarket_kit::sim::{SIM_CHAIN_ID, SimulatedChain};
use apimarket_kit::view::{self, ListingView};
use apimarket_kit::*;

use super::{POLL, raw_listing, seed_listings, setup, wait_for};

// =============================================================================
// Connection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_loads_listings_and_starts_polling() {
    let (chain, session) = setup();
    seed_listings(&chain, 3);
    let mut events = session.events();

    assert_eq!(session.state(), SessionState::Disconnected);
    let connection = session.connect().await.unwrap();

    assert_eq!(connection.address, SimulatedChain::accounts()[0]);
    assert_eq!(connection.chain_id, SIM_CHAIN_ID);
    assert_eq!(session.state(), SessionState::Polling);
    assert_eq!(chain.prompt_count(), 1);

    let listings = session.listings();
    assert_eq!(listings.len(), 3);
    assert_eq!(
        listings.iter().map(|l| l.id).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::Connected(_))).await,
        SessionEvent::Connected(connection)
    );
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::ListingsUpdated { .. })).await,
        SessionEvent::ListingsUpdated { count: 3, .. }
    ));
}

#[tokio::test]
async fn test_connect_without_wallet() {
    let session = MarketplaceSession::builder().build();
    assert_eq!(session.connect().await, Err(Error::ProviderUnavailable));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_does_not_prompt() {
    let (chain, session) = setup();
    assert_eq!(session.reconnect().await, Err(Error::NotConnected));

    session.connect().await.unwrap();
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);

    let connection = session.reconnect().await.unwrap();
    assert_eq!(connection.address, SimulatedChain::accounts()[0]);
    assert_eq!(session.state(), SessionState::Polling);
    assert_eq!(chain.prompt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_initial_refresh_failure_does_not_fail_connect() {
    let (chain, session) = setup();
    seed_listings(&chain, 2);
    chain.fail_counter_read(true);

    session.connect().await.unwrap();
    assert!(session.listings().is_empty());
    assert!(session.state().is_connected());

    chain.clear_read_failures();
    assert_eq!(session.refresh_listings().await.unwrap().len(), 2);
}

// =============================================================================
// Snapshots
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let (chain, session) = setup();
    seed_listings(&chain, 3);
    session.connect().await.unwrap();

    let first = session.listings();
    assert_eq!(first.len(), 3);
    let mut snapshots = session.subscribe();
    snapshots.borrow_and_update();
    let mut events = session.events();

    // One listing read fails while the count has grown
    seed_listings(&chain, 1);
    chain.fail_listing_read(1);

    let err = session.refresh_listings().await.unwrap_err();
    assert!(matches!(err, Error::ReadFailure(_)), "got {:?}", err);
    assert!(Arc::ptr_eq(&session.listings(), &first));
    assert!(!snapshots.has_changed().unwrap());
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::RefreshFailed { .. })).await,
        SessionEvent::RefreshFailed { .. }
    ));

    chain.clear_read_failures();
    let second = session.refresh_listings().await.unwrap();
    assert_eq!(second.len(), 4);
    assert!(second.version() > first.version());
    assert!(snapshots.has_changed().unwrap());
    assert_eq!(snapshots.borrow_and_update().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_large_prices_round_trip_exactly() {
    let (chain, session) = setup();
    let price = U256::from((1u64 << 53) + 1);
    let huge = U256::from(1u64) << 200usize;
    chain.seed_listing(SimulatedChain::accounts()[0], raw_listing("Precise", price));
    session.connect().await.unwrap();

    let listings = session.listings();
    let listing = listings.get(0).unwrap();
    assert_eq!(listing.price_per_request.as_u256(), price);
    assert_eq!(
        ListingView::from(listing).price_per_request_raw,
        "9007199254740993"
    );

    session
        .register_listing("Huge", "9007199254740993", huge, 86_400u64)
        .await
        .unwrap();
    let listings = session.listings();
    let registered = listings.latest().unwrap();
    assert_eq!(registered.price_per_request.as_u256(), price);
    assert_eq!(registered.subscription_price.as_u256(), huge);

    // A float above 2^53 has already lost precision and is refused
    let sends = chain.send_count();
    assert!(matches!(
        session
            .register_listing("Lossy", 9_007_199_254_740_993.0f64, 1000u64, 86_400u64)
            .await,
        Err(Error::InvalidInput {
            field: "price_per_request",
            ..
        })
    ));
    assert_eq!(chain.send_count(), sends);
}

// =============================================================================
// Polling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_polling_picks_up_new_listings() {
    let (chain, session) = setup();
    seed_listings(&chain, 1);
    session.connect().await.unwrap();
    assert_eq!(session.listings().len(), 1);

    seed_listings(&chain, 1);
    tokio::time::sleep(POLL + Duration::from_millis(100)).await;

    assert_eq!(session.listings().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_tick_waits_for_next_tick() {
    let (chain, session) = setup();
    seed_listings(&chain, 2);
    session.connect().await.unwrap();
    let first = session.listings();

    chain.fail_counter_read(true);
    let calls = chain.call_count();

    tokio::time::sleep(POLL + Duration::from_millis(100)).await;
    assert_eq!(chain.call_count(), calls + 1);
    assert!(Arc::ptr_eq(&session.listings(), &first));

    tokio::time::sleep(POLL).await;
    assert_eq!(chain.call_count(), calls + 2);

    chain.clear_read_failures();
    seed_listings(&chain, 1);
    tokio::time::sleep(POLL).await;
    assert_eq!(session.listings().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_polling() {
    let (chain, session) = setup();
    session.connect().await.unwrap();

    session.pause_polling();
    assert_eq!(session.state(), SessionState::Connected);
    let calls = chain.call_count();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(chain.call_count(), calls);

    session.resume_polling().unwrap();
    assert_eq!(session.state(), SessionState::Polling);
    tokio::time::sleep(POLL + Duration::from_millis(100)).await;
    assert_eq!(chain.call_count(), calls + 1);
}

// =============================================================================
// Disconnection and account changes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_wallet_disconnect_cancels_polling() {
    let (chain, session) = setup();
    seed_listings(&chain, 2);
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Polling);
    let mut events = session.events();

    chain.disconnect_wallet();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected)).await;

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.connection().is_none());
    assert!(session.listings().is_empty());

    let calls = chain.call_count();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(chain.call_count(), calls);

    assert_eq!(
        session.refresh_listings().await.unwrap_err(),
        Error::NotConnected
    );
    assert_eq!(
        session.use_access(0).await.unwrap_err(),
        Error::NotConnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_account_switch_rebinds_contract() {
    let (chain, session) = setup();
    seed_listings(&chain, 2);
    session.connect().await.unwrap();
    let mut events = session.events();
    let other = SimulatedChain::accounts()[1];

    chain.switch_account(other);

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::AccountChanged(_))).await,
        SessionEvent::AccountChanged(WalletConnection {
            address: other,
            chain_id: SIM_CHAIN_ID,
        })
    );
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::ListingsUpdated { .. })).await,
        SessionEvent::ListingsUpdated { count: 2, .. }
    ));
    assert_eq!(session.connection().map(|c| c.address), Some(other));
    assert_eq!(session.state(), SessionState::Polling);
    assert_eq!(chain.prompt_count(), 1);

    // New transactions are sent from the new account
    session.purchase_access(0, 1u64).await.unwrap();
    assert_eq!(chain.access(other, 0), U256::from(1u64));
    assert_eq!(chain.access(SimulatedChain::accounts()[0], 0), U256::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_polling() {
    let (chain, session) = setup();
    session.connect().await.unwrap();
    let observer = session.clone();

    session.shutdown();
    assert_eq!(observer.state(), SessionState::Disconnected);

    let calls = chain.call_count();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(chain.call_count(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_session_stops_polling() {
    let (chain, session) = setup();
    session.connect().await.unwrap();
    drop(session);

    let calls = chain.call_count();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(chain.call_count(), calls);
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_register_confirm_refresh_round_trip() {
    let (chain, session) = setup();
    seed_listings(&chain, 2);
    session.connect().await.unwrap();
    let mut events = session.events();

    let receipt = session
        .register_listing("TestAPI", 100, 1000, 86_400)
        .await
        .unwrap();
    assert!(receipt.succeeded());

    let listings = session.listings();
    let listing = listings.latest().unwrap();
    assert_eq!(listing.id, 2);
    assert_eq!(listing.name, "TestAPI");
    assert_eq!(listing.price_per_request, TokenAmount::base(100));
    assert_eq!(listing.subscription_price, TokenAmount::base(1000));
    assert_eq!(listing.subscription_duration, U256::from(86_400u64));
    assert!(listing.is_active);

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::OperationSubmitted { .. })).await,
        SessionEvent::OperationSubmitted {
            kind: OperationKind::RegisterListing,
            tx_hash: receipt.transaction_hash,
        }
    );
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::OperationConfirmed { .. })).await,
        SessionEvent::OperationConfirmed {
            kind: OperationKind::RegisterListing,
            tx_hash: receipt.transaction_hash,
        }
    );
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::ListingsUpdated { .. })).await,
        SessionEvent::ListingsUpdated { count: 3, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_two_phase_protocol_is_observable() {
    let (chain, session) = setup();
    session.connect().await.unwrap();
    chain.hold_transactions(true);

    let in_flight = session
        .begin(MarketCall::RegisterListing {
            name: "Staged".to_string(),
            price_per_request: U256::from(5u64),
            subscription_price: U256::from(50u64),
            subscription_duration: U256::from(3_600u64),
        })
        .await
        .unwrap();

    let pending = session.pending().unwrap();
    assert_eq!(pending.kind, OperationKind::RegisterListing);
    assert_eq!(pending.status, OperationStatus::Submitted);
    assert_eq!(pending.tx_hash, Some(in_flight.tx_hash()));

    chain.release_pending();
    in_flight.confirm().await.unwrap();
    assert!(session.pending().is_none());
    assert_eq!(
        session.last_operation().map(|op| op.status),
        Some(OperationStatus::Confirmed)
    );

    // Confirmation alone does not refresh
    assert!(session.listings().is_empty());
    assert_eq!(session.refresh_listings().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_input_makes_no_external_call() {
    let (chain, session) = setup();
    session.connect().await.unwrap();
    let requests = chain.total_requests();

    for result in [
        session.register_listing("TestAPI", -1, 1000, 86_400).await,
        session.register_listing("TestAPI", 3.5, 1000, 86_400).await,
        session.register_listing("TestAPI", 100, "-5", 86_400).await,
        session.register_listing("TestAPI", 100, 1000, f64::NAN).await,
        session.register_listing("", 100, 1000, 86_400).await,
    ] {
        let err = result.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }), "got {:?}", err);
    }

    assert_eq!(chain.total_requests(), requests);
    assert!(session.pending().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_listing_makes_no_external_call() {
    let (chain, session) = setup();
    seed_listings(&chain, 2);
    session.connect().await.unwrap();
    let requests = chain.total_requests();

    assert_eq!(
        session.use_access(7).await.unwrap_err(),
        Error::UnknownListing(7)
    );
    assert_eq!(
        session.purchase_access(2, 1u64).await.unwrap_err(),
        Error::UnknownListing(2)
    );
    assert_eq!(
        session.purchase_subscription(99).await.unwrap_err(),
        Error::UnknownListing(99)
    );

    assert_eq!(chain.total_requests(), requests);
}

#[tokio::test(start_paused = true)]
async fn test_second_mutation_rejected_while_pending() {
    let (chain, session) = setup();
    seed_listings(&chain, 1);
    session.connect().await.unwrap();

    // Buy from our own listing so there are earnings to withdraw
    session.purchase_access(0, 2u64).await.unwrap();

    chain.hold_transactions(true);
    let in_flight = session.begin(MarketCall::WithdrawEarnings).await.unwrap();
    assert_eq!(
        session.pending().map(|op| op.kind),
        Some(OperationKind::WithdrawEarnings)
    );
    let sends = chain.send_count();

    assert_eq!(
        session.purchase_access(0, 5u64).await.unwrap_err(),
        Error::OperationInProgress(OperationKind::WithdrawEarnings)
    );
    assert_eq!(
        session.withdraw_earnings().await.unwrap_err(),
        Error::OperationInProgress(OperationKind::WithdrawEarnings)
    );
    assert_eq!(
        session.purchase_subscription(0).await.unwrap_err(),
        Error::OperationInProgress(OperationKind::WithdrawEarnings)
    );
    assert_eq!(chain.send_count(), sends);

    // Reads are not blocked by a pending mutation
    assert_eq!(session.refresh_listings().await.unwrap().len(), 1);

    chain.hold_transactions(false);
    chain.release_pending();
    in_flight.confirm().await.unwrap();
    assert!(session.pending().is_none());

    // The slot is free again
    session.use_access(0).await.unwrap();
    assert_eq!(chain.access(SimulatedChain::accounts()[0], 0), U256::from(1u64));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_in_flight_releases_slot_on_confirmation() {
    let (chain, session) = setup();
    session.connect().await.unwrap();
    chain.hold_transactions(true);

    let in_flight = session
        .begin(MarketCall::RegisterListing {
            name: "Detached".to_string(),
            price_per_request: U256::from(1u64),
            subscription_price: U256::from(1u64),
            subscription_duration: U256::from(1u64),
        })
        .await
        .unwrap();
    drop(in_flight);
    assert!(session.pending().is_some());

    let mut events = session.events();
    chain.release_pending();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::OperationConfirmed { .. })
    })
    .await;
    assert!(session.pending().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_transaction_surfaces_reason() {
    let (chain, session) = setup();
    seed_listings(&chain, 1);
    session.connect().await.unwrap();
    let mut events = session.events();

    chain.reject_next_transaction();
    match session.purchase_access(0, 1u64).await {
        Err(Error::TransactionFailed(reason)) => {
            assert!(reason.contains("rejected"), "reason: {}", reason)
        }
        other => panic!("Expected TransactionFailed, got: {:?}", other),
    }
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::OperationFailed { .. })).await,
        SessionEvent::OperationFailed {
            kind: OperationKind::PurchaseAccess,
            ..
        }
    ));
    assert!(session.pending().is_none());
    assert_eq!(
        session.last_operation().map(|op| op.status),
        Some(OperationStatus::Failed)
    );

    // Not retried; the next call goes through
    session.purchase_access(0, 1u64).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reverted_transaction_fails() {
    let (chain, session) = setup();
    seed_listings(&chain, 1);
    session.connect().await.unwrap();

    // No access purchased yet
    match session.use_access(0).await {
        Err(Error::TransactionFailed(reason)) => {
            assert!(reason.contains("reverted"), "reason: {}", reason)
        }
        other => panic!("Expected TransactionFailed, got: {:?}", other),
    }
    assert!(session.pending().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_earnings_and_balance() {
    let (chain, session) = setup();
    let seller = SimulatedChain::accounts()[0];
    chain.seed_listing(seller, raw_listing("Weather", U256::from(100u64)));
    chain.set_balance(seller, TokenAmount::base(1_000));
    session.connect().await.unwrap();

    assert_eq!(session.token_balance().await.unwrap(), TokenAmount::base(1_000));

    session.purchase_access(0, 3u64).await.unwrap();
    assert_eq!(session.token_balance().await.unwrap(), TokenAmount::base(700));
    assert_eq!(chain.earnings(seller), TokenAmount::base(300));

    session.withdraw_earnings().await.unwrap();
    assert_eq!(session.token_balance().await.unwrap(), TokenAmount::base(1_000));
    assert_eq!(session.listings().get(0).unwrap().total_purchases, U256::from(1u64));
}

// =============================================================================
// Views
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_views_follow_snapshot() {
    let (chain, session) = setup();
    seed_listings(&chain, 2);
    chain.set_listing_active(1, false);
    session.connect().await.unwrap();

    let rows = view::project_listings(&session.listings());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, "Active");
    assert_eq!(rows[1].status, "Inactive");
    assert_eq!(rows[0].subscription_duration, "1 day");
    assert_eq!(rows[0].price_per_request_raw, "100");

    let connection = session.connection().unwrap();
    let balance = BalanceView::new(connection.address, session.token_balance().await.unwrap());
    assert_eq!(balance.short_address, view::short_address(&connection.address));
    assert_eq!(balance.balance, "1000 tokens");
}
