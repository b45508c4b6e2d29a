//! In-memory chain and wallet for tests and demos.
//!
//! [`SimulatedChain`] implements [`WalletProvider`] on top of a small
//! in-process model of the marketplace contract. Calldata is decoded with the
//! real ABI, so everything above the provider boundary runs unmodified.
//!
//! # Example
//!
//! ```rust,no_run
//! use apimarket_kit::sim::SimulatedChain;
//! use apimarket_kit::*;
//!
//! # async fn example() -> Result<(), Error> {
//! let chain = SimulatedChain::new();
//! let session = MarketplaceSession::builder().provider(chain.clone()).build();
//!
//! session.connect().await?;
//! session.register_listing("TestAPI", 100, 1000, 86_400).await?;
//! assert_eq!(chain.prompt_count(), 1);
//!
//! // Simulate the user switching accounts in their wallet
//! chain.switch_account(SimulatedChain::accounts()[1]);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256, U64, U256, address, keccak256};
use alloy_sol_types::{SolInterface, SolValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::DEFAULT_CONTRACT_ADDRESS;
use crate::contract::RawListing;
use crate::contract::abi::IApiMarketplace::IApiMarketplaceCalls;
use crate::error::{ProviderError, USER_REJECTED_CODE};
use crate::lock;
use crate::provider::{RequestFuture, WalletProvider, from_hex, to_hex};
use crate::types::TokenAmount;

/// Chain id reported by the simulator (the usual local dev chain id).
pub const SIM_CHAIN_ID: u64 = 31_337;

/// Gas reported on every simulated receipt.
const SIM_GAS_USED: u64 = 21_000;

/// JSON-RPC code nodes use for reverted calls.
const REVERT_CODE: i64 = 3;

const DEV_ACCOUNTS: [Address; 2] = [
    address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
    address!("70997970C51812dc3A010C7d01b50e0d17dc79C8"),
];

#[derive(Clone, Debug)]
struct SimListing {
    owner: Address,
    listing: RawListing,
}

#[derive(Clone, Copy, Debug)]
struct SimReceipt {
    block: u64,
    success: bool,
}

/// A transaction accepted by the wallet but not yet mined.
#[derive(Clone, Debug)]
struct HeldTransaction {
    hash: B256,
    from: Address,
    data: Vec<u8>,
}

#[derive(Debug)]
struct SimState {
    contract: Address,
    accounts: Vec<Address>,
    authorized: bool,
    deny_connection: bool,
    reject_next: bool,
    hold_transactions: bool,
    fail_counter: bool,
    fail_listings: HashSet<u64>,

    listings: Vec<SimListing>,
    balances: HashMap<Address, U256>,
    earnings: HashMap<Address, U256>,
    access: HashMap<(Address, u64), U256>,
    subscriptions: HashSet<(Address, u64)>,

    held: Vec<HeldTransaction>,
    receipts: HashMap<B256, SimReceipt>,
    block: u64,
    nonce: u64,

    requests: HashMap<String, usize>,
}

impl SimState {
    fn new() -> Self {
        let starting_balance = TokenAmount::tokens(1_000).as_u256();
        Self {
            contract: DEFAULT_CONTRACT_ADDRESS,
            accounts: DEV_ACCOUNTS.to_vec(),
            authorized: false,
            deny_connection: false,
            reject_next: false,
            hold_transactions: false,
            fail_counter: false,
            fail_listings: HashSet::new(),
            listings: Vec::new(),
            balances: DEV_ACCOUNTS
                .iter()
                .map(|account| (*account, starting_balance))
                .collect(),
            earnings: HashMap::new(),
            access: HashMap::new(),
            subscriptions: HashSet::new(),
            held: Vec::new(),
            receipts: HashMap::new(),
            block: 0,
            nonce: 0,
            requests: HashMap::new(),
        }
    }

    fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, ProviderError> {
        *self.requests.entry(method.to_string()).or_default() += 1;

        match method {
            "eth_requestAccounts" => {
                if self.deny_connection {
                    return Err(ProviderError::from_rpc(
                        USER_REJECTED_CODE,
                        "User rejected the request.",
                        None,
                    ));
                }
                self.authorized = true;
                Ok(json!(self.accounts))
            }
            "eth_accounts" => {
                let accounts: &[Address] = if self.authorized { &self.accounts } else { &[] };
                Ok(json!(accounts))
            }
            "eth_chainId" => Ok(json!(U64::from(SIM_CHAIN_ID))),
            "eth_call" => {
                let call: CallRequest = first_param(params)?;
                if call.to != self.contract {
                    return Ok(json!("0x"));
                }
                let data = from_hex(&call.data)?;
                self.view(&data).map(|ret| json!(to_hex(&ret)))
            }
            "eth_sendTransaction" => {
                let tx: CallRequest = first_param(params)?;
                let from = tx
                    .from
                    .ok_or_else(|| ProviderError::from_rpc(-32602, "missing from", None))?;
                if !self.authorized || !self.accounts.contains(&from) {
                    return Err(ProviderError::Unauthorized);
                }
                if std::mem::take(&mut self.reject_next) {
                    return Err(ProviderError::from_rpc(
                        USER_REJECTED_CODE,
                        "User denied transaction signature.",
                        None,
                    ));
                }
                let data = from_hex(&tx.data)?;
                Ok(json!(self.accept(from, data)))
            }
            "eth_getTransactionReceipt" => {
                let (hash,): (B256,) = serde_json::from_value(params)?;
                Ok(match self.receipts.get(&hash) {
                    Some(receipt) => json!({
                        "transactionHash": hash,
                        "blockNumber": U64::from(receipt.block),
                        "status": U64::from(u64::from(receipt.success)),
                        "gasUsed": U256::from(SIM_GAS_USED),
                    }),
                    None => Value::Null,
                })
            }
            other => Err(ProviderError::from_rpc(
                -32601,
                format!("the method {} does not exist/is not available", other),
                None,
            )),
        }
    }

    fn view(&self, data: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let call = IApiMarketplaceCalls::abi_decode(data).map_err(|e| revert(e.to_string()))?;
        match call {
            IApiMarketplaceCalls::apiIdCounter(_) => {
                if self.fail_counter {
                    return Err(ProviderError::network("simulated counter failure", None, false));
                }
                Ok(U256::from(self.listings.len()).abi_encode())
            }
            IApiMarketplaceCalls::apis(call) => {
                let id: u64 = call.id.try_into().map_err(|_| revert("id out of range"))?;
                if self.fail_listings.contains(&id) {
                    return Err(ProviderError::network(
                        format!("simulated read failure for listing {}", id),
                        None,
                        false,
                    ));
                }
                let entry = usize::try_from(id)
                    .ok()
                    .and_then(|i| self.listings.get(i))
                    .ok_or_else(|| revert("API does not exist"))?;
                let l = &entry.listing;
                Ok((
                    l.name.clone(),
                    l.price_per_request,
                    l.subscription_price,
                    l.subscription_duration,
                    l.total_purchases,
                    l.is_active,
                )
                    .abi_encode_params())
            }
            IApiMarketplaceCalls::getUserTokenBalance(call) => {
                Ok(self.balance_of(call.user).abi_encode())
            }
            _ => Err(revert("state-changing method called through eth_call")),
        }
    }

    fn accept(&mut self, from: Address, data: Vec<u8>) -> B256 {
        self.nonce += 1;
        let mut preimage = self.nonce.to_be_bytes().to_vec();
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(&data);
        let hash = keccak256(&preimage);

        if self.hold_transactions {
            self.held.push(HeldTransaction { hash, from, data });
        } else {
            self.mine(HeldTransaction { hash, from, data });
        }
        hash
    }

    fn mine(&mut self, tx: HeldTransaction) {
        let success = match self.execute(tx.from, &tx.data) {
            Ok(()) => true,
            Err(reason) => {
                debug!(hash = %tx.hash, reason, "simulated transaction reverted");
                false
            }
        };
        self.block += 1;
        self.receipts.insert(
            tx.hash,
            SimReceipt {
                block: self.block,
                success,
            },
        );
    }

    fn execute(&mut self, from: Address, data: &[u8]) -> Result<(), &'static str> {
        let call = IApiMarketplaceCalls::abi_decode(data).map_err(|_| "invalid calldata")?;
        match call {
            IApiMarketplaceCalls::registerAPI(call) => {
                self.listings.push(SimListing {
                    owner: from,
                    listing: RawListing {
                        name: call.name,
                        price_per_request: call.pricePerRequest,
                        subscription_price: call.subscriptionPrice,
                        subscription_duration: call.subscriptionDuration,
                        total_purchases: U256::ZERO,
                        is_active: true,
                    },
                });
                Ok(())
            }
            IApiMarketplaceCalls::approveAndPurchaseAPIAccess(call) => {
                let id = self.active_listing(call.apiId)?;
                let cost = self.listings[id]
                    .listing
                    .price_per_request
                    .checked_mul(call.numberOfRequests)
                    .ok_or("cost overflow")?;
                self.charge(from, id, cost)?;
                *self.access.entry((from, id as u64)).or_default() += call.numberOfRequests;
                Ok(())
            }
            IApiMarketplaceCalls::approveAndPurchaseSubscription(call) => {
                let id = self.active_listing(call.apiId)?;
                let cost = self.listings[id].listing.subscription_price;
                self.charge(from, id, cost)?;
                self.subscriptions.insert((from, id as u64));
                Ok(())
            }
            IApiMarketplaceCalls::useAPIAccess(call) => {
                let id = self.active_listing(call.apiId)? as u64;
                if self.subscriptions.contains(&(from, id)) {
                    return Ok(());
                }
                let remaining = self.access.entry((from, id)).or_default();
                if remaining.is_zero() {
                    return Err("no access remaining");
                }
                *remaining -= U256::from(1u64);
                Ok(())
            }
            IApiMarketplaceCalls::withdrawEarnings(_) => {
                let earned = self.earnings.remove(&from).unwrap_or_default();
                if earned.is_zero() {
                    return Err("no earnings to withdraw");
                }
                *self.balances.entry(from).or_default() += earned;
                Ok(())
            }
            _ => Err("view method sent as transaction"),
        }
    }

    fn active_listing(&self, id: U256) -> Result<usize, &'static str> {
        let index: usize = id.try_into().map_err(|_| "API does not exist")?;
        match self.listings.get(index) {
            Some(entry) if entry.listing.is_active => Ok(index),
            Some(_) => Err("API is not active"),
            None => Err("API does not exist"),
        }
    }

    fn charge(&mut self, buyer: Address, id: usize, cost: U256) -> Result<(), &'static str> {
        let balance = self.balances.entry(buyer).or_default();
        if *balance < cost {
            return Err("insufficient token balance");
        }
        *balance -= cost;
        let entry = &mut self.listings[id];
        *self.earnings.entry(entry.owner).or_default() += cost;
        entry.listing.total_purchases += U256::from(1u64);
        Ok(())
    }

    fn balance_of(&self, owner: Address) -> U256 {
        self.balances.get(&owner).copied().unwrap_or_default()
    }
}

/// `eth_call` / `eth_sendTransaction` request object.
#[derive(Deserialize)]
struct CallRequest {
    #[serde(default)]
    from: Option<Address>,
    to: Address,
    #[serde(default, alias = "input")]
    data: String,
}

fn first_param<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ProviderError> {
    match params {
        Value::Array(mut items) if !items.is_empty() => {
            Ok(serde_json::from_value(items.swap_remove(0))?)
        }
        other => Err(ProviderError::from_rpc(
            -32602,
            format!("invalid params: {}", other),
            None,
        )),
    }
}

fn revert(reason: impl fmt::Display) -> ProviderError {
    ProviderError::from_rpc(REVERT_CODE, format!("execution reverted: {}", reason), None)
}

/// A wallet plus marketplace contract living in memory.
///
/// Clones share state, so a test can keep one handle for inspection and
/// hand another to the session.
#[derive(Clone)]
pub struct SimulatedChain {
    state: Arc<Mutex<SimState>>,
    accounts_tx: broadcast::Sender<Vec<Address>>,
}

impl fmt::Debug for SimulatedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SimulatedChain")
            .field("accounts", &state.accounts)
            .field("listings", &state.listings.len())
            .field("block", &state.block)
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    /// A chain with two funded dev accounts (1000 tokens each) and the
    /// contract at [`DEFAULT_CONTRACT_ADDRESS`].
    pub fn new() -> Self {
        let (accounts_tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
            accounts_tx,
        }
    }

    /// Serve the contract at `address` instead of the default.
    pub fn with_contract_address(self, address: Address) -> Self {
        lock(&self.state).contract = address;
        self
    }

    /// The built-in dev accounts.
    pub fn accounts() -> [Address; 2] {
        DEV_ACCOUNTS
    }

    // ========================================================================
    // Wallet controls
    // ========================================================================

    /// Make `address` the wallet's active account and notify listeners.
    pub fn switch_account(&self, address: Address) {
        let accounts = {
            let mut state = lock(&self.state);
            state.accounts.retain(|a| *a != address);
            state.accounts.insert(0, address);
            state.accounts.clone()
        };
        let _ = self.accounts_tx.send(accounts);
    }

    /// Revoke the dapp's access and report an empty account list.
    pub fn disconnect_wallet(&self) {
        lock(&self.state).authorized = false;
        let _ = self.accounts_tx.send(Vec::new());
    }

    /// Make the next `eth_requestAccounts` calls fail as user rejections.
    pub fn deny_connection(&self, deny: bool) {
        lock(&self.state).deny_connection = deny;
    }

    /// Reject the next `eth_sendTransaction` with code 4001.
    pub fn reject_next_transaction(&self) {
        lock(&self.state).reject_next = true;
    }

    /// Keep accepted transactions pending until [`release_pending`](Self::release_pending).
    pub fn hold_transactions(&self, hold: bool) {
        lock(&self.state).hold_transactions = hold;
    }

    /// Mine every held transaction. Returns how many were mined.
    pub fn release_pending(&self) -> usize {
        let mut state = lock(&self.state);
        let held = std::mem::take(&mut state.held);
        let count = held.len();
        for tx in held {
            state.mine(tx);
        }
        count
    }

    // ========================================================================
    // Contract controls
    // ========================================================================

    /// Add a listing owned by `owner` directly to contract storage.
    pub fn seed_listing(&self, owner: Address, listing: RawListing) -> u64 {
        let mut state = lock(&self.state);
        state.listings.push(SimListing { owner, listing });
        state.listings.len() as u64 - 1
    }

    pub fn set_listing_active(&self, id: u64, is_active: bool) {
        let mut state = lock(&self.state);
        if let Some(entry) = usize::try_from(id).ok().and_then(|i| state.listings.get_mut(i)) {
            entry.listing.is_active = is_active;
        }
    }

    pub fn set_balance(&self, owner: Address, balance: TokenAmount) {
        lock(&self.state).balances.insert(owner, balance.as_u256());
    }

    /// Make `apis(id)` reads fail until cleared.
    pub fn fail_listing_read(&self, id: u64) {
        lock(&self.state).fail_listings.insert(id);
    }

    /// Make `apiIdCounter()` reads fail until cleared.
    pub fn fail_counter_read(&self, fail: bool) {
        lock(&self.state).fail_counter = fail;
    }

    pub fn clear_read_failures(&self) {
        let mut state = lock(&self.state);
        state.fail_counter = false;
        state.fail_listings.clear();
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn listing(&self, id: u64) -> Option<RawListing> {
        let state = lock(&self.state);
        usize::try_from(id)
            .ok()
            .and_then(|i| state.listings.get(i))
            .map(|entry| entry.listing.clone())
    }

    pub fn listing_count(&self) -> u64 {
        lock(&self.state).listings.len() as u64
    }

    pub fn balance(&self, owner: Address) -> TokenAmount {
        TokenAmount::from_u256(lock(&self.state).balance_of(owner))
    }

    pub fn earnings(&self, owner: Address) -> TokenAmount {
        let state = lock(&self.state);
        TokenAmount::from_u256(state.earnings.get(&owner).copied().unwrap_or_default())
    }

    /// Requests left for `buyer` on listing `id`.
    pub fn access(&self, buyer: Address, id: u64) -> U256 {
        lock(&self.state)
            .access
            .get(&(buyer, id))
            .copied()
            .unwrap_or_default()
    }

    /// Transactions accepted but not yet mined.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).held.len()
    }

    /// Number of `method` requests received.
    pub fn request_count(&self, method: &str) -> usize {
        lock(&self.state).requests.get(method).copied().unwrap_or(0)
    }

    /// Number of requests received, across all methods.
    pub fn total_requests(&self) -> usize {
        lock(&self.state).requests.values().sum()
    }

    /// Permission prompts shown (`eth_requestAccounts`).
    pub fn prompt_count(&self) -> usize {
        self.request_count("eth_requestAccounts")
    }

    pub fn call_count(&self) -> usize {
        self.request_count("eth_call")
    }

    pub fn send_count(&self) -> usize {
        self.request_count("eth_sendTransaction")
    }
}

impl WalletProvider for SimulatedChain {
    fn request<'a>(&'a self, method: &'a str, params: Value) -> RequestFuture<'a> {
        let result = lock(&self.state).dispatch(method, params);
        Box::pin(async move {
            // Behave like a remote provider: never complete synchronously.
            tokio::task::yield_now().await;
            result
        })
    }

    fn account_events(&self) -> broadcast::Receiver<Vec<Address>> {
        self.accounts_tx.subscribe()
    }
}
