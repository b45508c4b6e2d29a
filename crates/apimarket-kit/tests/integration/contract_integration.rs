//! Contract client reads and transactions against the simulated contract.

use std::sync::Arc;
use std::time::Duration;

use apimarket_kit::config::DEFAULT_CONTRACT_ADDRESS;
use apimarket_kit::sim::SimulatedChain;
use apimarket_kit::*;

use super::raw_listing;

async fn contract(chain: &SimulatedChain) -> MarketplaceContract {
    super::init_tracing();
    let adapter = ChainAdapter::new(Some(Arc::new(chain.clone())));
    adapter.connect().await.unwrap();
    MarketplaceContract::new(DEFAULT_CONTRACT_ADDRESS, adapter.signer().unwrap())
        .with_receipt_poll_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn test_reads() {
    let chain = SimulatedChain::new();
    let owner = SimulatedChain::accounts()[0];
    chain.seed_listing(owner, raw_listing("Weather", U256::from(250u64)));
    chain.seed_listing(owner, raw_listing("Geocoding", U256::from(75u64)));

    let contract = contract(&chain).await;

    assert_eq!(contract.listing_count().await.unwrap(), U256::from(2u64));

    let listing = contract.listing(1).await.unwrap();
    assert_eq!(listing.name, "Geocoding");
    assert_eq!(listing.price_per_request, U256::from(75u64));
    assert_eq!(listing.subscription_duration, U256::from(86_400u64));
    assert!(listing.is_active);

    let balance = contract.token_balance(owner).await.unwrap();
    assert_eq!(balance, TokenAmount::tokens(1_000).as_u256());
}

#[tokio::test]
async fn test_read_missing_listing_reverts() {
    let chain = SimulatedChain::new();
    let contract = contract(&chain).await;

    let err = contract.listing(0).await.unwrap_err();
    match err {
        ContractError::Provider(ProviderError::Rpc { message, .. }) => {
            assert!(message.contains("reverted"), "message: {}", message);
        }
        other => panic!("Expected reverted call, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_returns_before_mining() {
    let chain = SimulatedChain::new();
    let contract = contract(&chain).await;
    chain.hold_transactions(true);

    let call = MarketCall::RegisterListing {
        name: "TestAPI".to_string(),
        price_per_request: U256::from(100u64),
        subscription_price: U256::from(1000u64),
        subscription_duration: U256::from(86_400u64),
    };
    let handle = contract.submit(&call, None).await.unwrap();
    let hash = handle.hash();
    assert_eq!(chain.pending_count(), 1);
    assert_eq!(chain.listing_count(), 0);

    assert_eq!(chain.release_pending(), 1);
    let receipt = handle.await.unwrap();
    assert_eq!(receipt.transaction_hash, hash);
    assert!(receipt.succeeded());
    assert_eq!(chain.listing(0).unwrap().name, "TestAPI");
}

#[tokio::test]
async fn test_reverted_transaction() {
    let chain = SimulatedChain::new();
    let contract = contract(&chain).await;

    let handle = contract
        .submit(&MarketCall::WithdrawEarnings, None)
        .await
        .unwrap();
    let hash = handle.hash();

    match handle.wait().await {
        Err(ContractError::Reverted { tx_hash }) => assert_eq!(tx_hash, hash),
        other => panic!("Expected Reverted, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_signature() {
    let chain = SimulatedChain::new();
    let contract = contract(&chain).await;
    chain.reject_next_transaction();

    let err = contract
        .submit(&MarketCall::WithdrawEarnings, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ContractError::Provider(ProviderError::UserRejected)
    ));
    assert_eq!(chain.pending_count(), 0);
}
