//! Wallet connection lifecycle through the chain adapter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apimarket_kit::sim::{SIM_CHAIN_ID, SimulatedChain};
use apimarket_kit::*;
use tokio::sync::mpsc;

fn adapter(chain: &SimulatedChain) -> ChainAdapter {
    super::init_tracing();
    ChainAdapter::new(Some(Arc::new(chain.clone())))
}

#[tokio::test]
async fn test_connect_prompts_exactly_once() {
    let chain = SimulatedChain::new();
    let adapter = adapter(&chain);

    let connection = adapter.connect().await.unwrap();

    assert_eq!(connection.address, SimulatedChain::accounts()[0]);
    assert_eq!(connection.chain_id, SIM_CHAIN_ID);
    assert_eq!(chain.prompt_count(), 1);
    assert_eq!(adapter.connection(), Some(connection));
}

#[tokio::test]
async fn test_reconnect_is_silent() {
    let chain = SimulatedChain::new();

    // Nothing authorized yet: silent reconnect finds no account
    let fresh = adapter(&chain);
    assert_eq!(fresh.reconnect().await, Err(Error::NotConnected));
    assert_eq!(chain.prompt_count(), 0);

    adapter(&chain).connect().await.unwrap();
    assert_eq!(chain.prompt_count(), 1);

    // A new adapter (e.g. after a page reload) restores without prompting
    let restored = adapter(&chain);
    let connection = restored.reconnect().await.unwrap();
    assert_eq!(connection.address, SimulatedChain::accounts()[0]);
    assert_eq!(chain.prompt_count(), 1);
    assert_eq!(chain.request_count("eth_accounts"), 2);
}

#[tokio::test]
async fn test_denied_connection() {
    let chain = SimulatedChain::new();
    chain.deny_connection(true);
    let adapter = adapter(&chain);

    let err = adapter.connect().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {:?}", err);
    assert!(err.is_recoverable_by_connect());
    assert!(adapter.connection().is_none());
    assert!(matches!(adapter.signer(), Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_no_wallet_installed() {
    let adapter = ChainAdapter::new(None);
    assert_eq!(adapter.connect().await, Err(Error::ProviderUnavailable));
    assert!(!Error::ProviderUnavailable.is_recoverable_by_connect());
}

#[tokio::test]
async fn test_signer_follows_connection() {
    let chain = SimulatedChain::new();
    let adapter = adapter(&chain);

    assert!(matches!(adapter.signer(), Err(Error::NotConnected)));
    adapter.connect().await.unwrap();
    assert_eq!(
        adapter.signer().unwrap().address(),
        SimulatedChain::accounts()[0]
    );

    adapter.disconnect();
    assert!(adapter.connection().is_none());
    assert!(matches!(adapter.signer(), Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_accounts_handler_replaces_previous() {
    let chain = SimulatedChain::new();
    let adapter = adapter(&chain);
    adapter.connect().await.unwrap();

    let first_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&first_calls);
    adapter.on_accounts_changed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    adapter.on_accounts_changed(move |change| {
        let _ = tx.send(change);
    });

    let other = SimulatedChain::accounts()[1];
    chain.switch_account(other);

    let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, AccountsChanged::Switched(other));
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    assert_eq!(adapter.connection().map(|c| c.address), Some(other));
    assert_eq!(adapter.signer().unwrap().address(), other);
}

#[tokio::test]
async fn test_empty_account_list_disconnects() {
    let chain = SimulatedChain::new();
    let adapter = adapter(&chain);
    adapter.connect().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    adapter.on_accounts_changed(move |change| {
        let _ = tx.send(change);
    });

    chain.disconnect_wallet();

    let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, AccountsChanged::Disconnected);
    assert!(adapter.connection().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_during_disconnect_delivery_keeps_listening() {
    let chain = SimulatedChain::new();
    let adapter = Arc::new(adapter(&chain));
    adapter.connect().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let runtime = tokio::runtime::Handle::current();
    let weak = Arc::downgrade(&adapter);
    adapter.on_accounts_changed(move |change| {
        if let (AccountsChanged::Disconnected, Some(adapter)) = (change, weak.upgrade()) {
            // Reconnect on the other worker while this callback is still running
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            runtime.spawn(async move {
                let _ = done_tx.send(adapter.connect().await.is_ok());
            });
            let _ = done_rx.recv_timeout(Duration::from_secs(5));
        }
        let _ = tx.send(change);
    });

    chain.disconnect_wallet();
    let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, AccountsChanged::Disconnected);
    assert_eq!(
        adapter.connection().map(|c| c.address),
        Some(SimulatedChain::accounts()[0])
    );

    let other = SimulatedChain::accounts()[1];
    chain.switch_account(other);
    let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, AccountsChanged::Switched(other));
    assert_eq!(adapter.connection().map(|c| c.address), Some(other));
}
