//! The marketplace session: one wallet connection, one contract client,
//! polled listings and serialized mutations.
//!
//! A [`MarketplaceSession`] is the single coordinating object every view
//! consumes. Views never talk to the wallet or the contract themselves; they
//! subscribe to listing snapshots with [`MarketplaceSession::subscribe`] and
//! to lifecycle notifications with [`MarketplaceSession::events`].
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect()/reconnect()--> Polling
//! Polling      --pause_polling()--------> Connected
//! Connected    --resume_polling()-------> Polling
//! any          --empty account list-----> Disconnected
//! any          --disconnect()-----------> Disconnected
//! ```
//!
//! # Mutations
//!
//! Every state-mutating call goes through three observable phases:
//!
//! 1. [`begin`](MarketplaceSession::begin) validates, claims the single
//!    operation slot and submits. Emits [`SessionEvent::OperationSubmitted`].
//! 2. [`InFlight::confirm`] waits for the receipt. Emits
//!    [`SessionEvent::OperationConfirmed`] or [`SessionEvent::OperationFailed`]
//!    and releases the slot.
//! 3. [`refresh_listings`](MarketplaceSession::refresh_listings) re-reads the
//!    contract.
//!
//! The convenience methods ([`register_listing`](MarketplaceSession::register_listing),
//! [`purchase_access`](MarketplaceSession::purchase_access), ...) run all three.
//!
//! There is no timeout anywhere in this pipeline. A wallet or node that never
//! answers blocks that one operation, and the operation slot, indefinitely.

mod builder;
mod operation;
mod poller;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use alloy_primitives::{Address, B256};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MarketConfig;
use crate::contract::{MarketCall, MarketplaceContract, TransactionReceipt};
use crate::error::{ContractError, Error};
use crate::lock;
use crate::provider::ChainAdapter;
use crate::types::{
    AccountsChanged, IntoTokenAmount, Listing, ListingCollection, OperationKind,
    OperationStatus, PendingOperation, SessionState, Snapshot, TokenAmount, WalletConnection,
};

pub use builder::SessionBuilder;
pub use operation::InFlight;

/// Capacity of the session event channel. Slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications published by a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// `connect()` or `reconnect()` succeeded.
    Connected(WalletConnection),
    /// The wallet switched to another account; the snapshot was cleared.
    AccountChanged(WalletConnection),
    /// The wallet reported no accounts, or `disconnect()` was called.
    Disconnected,
    /// A new snapshot was published.
    ListingsUpdated { count: usize, version: u64 },
    /// A refresh failed and the previous snapshot was kept.
    RefreshFailed { reason: String },
    /// The wallet broadcast a mutating transaction.
    OperationSubmitted { kind: OperationKind, tx_hash: B256 },
    /// The transaction was mined successfully.
    OperationConfirmed { kind: OperationKind, tx_hash: B256 },
    /// Submission was rejected, or the transaction reverted.
    OperationFailed { kind: OperationKind, reason: String },
}

/// Connection-scoped state. Replaced as a unit on connect, account switch
/// and disconnect.
#[derive(Default)]
struct Bound {
    connection: Option<WalletConnection>,
    contract: Option<MarketplaceContract>,
    /// Bumped on every rebind; refreshes started under an older epoch are
    /// discarded.
    epoch: u64,
}

pub(crate) struct Inner {
    adapter: ChainAdapter,
    contract_address: Address,
    poll_interval: Duration,
    receipt_poll_interval: Duration,
    bound: Mutex<Bound>,
    operation: Mutex<Option<PendingOperation>>,
    snapshot: watch::Sender<Snapshot>,
    version: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    poller: Mutex<Option<JoinHandle<()>>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl Inner {
    fn new(adapter: ChainAdapter, config: &MarketConfig) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(ListingCollection::empty()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            adapter,
            contract_address: config.contract_address,
            poll_interval: config.poll_interval,
            receipt_poll_interval: config.receipt_poll_interval,
            bound: Mutex::new(Bound::default()),
            operation: Mutex::new(None),
            snapshot,
            version: AtomicU64::new(0),
            events,
            poller: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn contract(&self) -> Result<MarketplaceContract, Error> {
        lock(&self.bound).contract.clone().ok_or(Error::NotConnected)
    }

    /// Publish a new snapshot. Callers hold the `bound` lock.
    fn publish(&self, listings: Vec<Listing>) -> Snapshot {
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(ListingCollection::new(listings, version));
        self.snapshot.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    /// Bind a fresh contract client to `connection`.
    fn bind(&self, connection: WalletConnection) -> Result<(), Error> {
        let signer = self.adapter.signer()?;
        let contract = MarketplaceContract::new(self.contract_address, signer)
            .with_receipt_poll_interval(self.receipt_poll_interval);

        let mut bound = lock(&self.bound);
        let same_account = bound.connection.map(|c| c.address) == Some(connection.address);
        bound.connection = Some(connection);
        bound.contract = Some(contract);
        bound.epoch += 1;
        if !same_account {
            self.publish(Vec::new());
        }
        Ok(())
    }

    /// Drop the connection-scoped state. Returns false if nothing was bound.
    fn unbind(&self) -> bool {
        self.stop_polling();
        let mut bound = lock(&self.bound);
        let was_connected = bound.connection.take().is_some();
        bound.contract = None;
        bound.epoch += 1;
        if was_connected {
            self.publish(Vec::new());
        }
        was_connected
    }

    fn stop_polling(&self) {
        if let Some(poller) = lock(&self.poller).take() {
            poller.abort();
            debug!("listing poller stopped");
        }
    }

    fn is_polling(&self) -> bool {
        lock(&self.poller)
            .as_ref()
            .is_some_and(|poller| !poller.is_finished())
    }

    async fn refresh(&self) -> Result<Snapshot, Error> {
        let _gate = self.refresh_gate.lock().await;

        let (contract, epoch) = {
            let bound = lock(&self.bound);
            let contract = bound.contract.clone().ok_or(Error::NotConnected)?;
            (contract, bound.epoch)
        };

        let listings = match read_listings(&contract).await {
            Ok(listings) => listings,
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "listing refresh failed, keeping previous snapshot");
                self.emit(SessionEvent::RefreshFailed {
                    reason: reason.clone(),
                });
                return Err(Error::ReadFailure(reason));
            }
        };

        let snapshot = {
            let bound = lock(&self.bound);
            if bound.epoch != epoch {
                debug!(epoch, current = bound.epoch, "discarding refresh from previous account");
                return Err(if bound.contract.is_some() {
                    Error::ReadFailure("account changed during refresh".to_string())
                } else {
                    Error::NotConnected
                });
            }
            self.publish(listings)
        };

        debug!(count = snapshot.len(), version = snapshot.version(), "listings refreshed");
        self.emit(SessionEvent::ListingsUpdated {
            count: snapshot.len(),
            version: snapshot.version(),
        });
        Ok(snapshot)
    }

    /// Claim the single operation slot for `kind`.
    fn claim(&self, kind: OperationKind) -> Result<(), Error> {
        let mut slot = lock(&self.operation);
        if let Some(current) = slot.as_ref().filter(|op| !op.is_settled()) {
            return Err(Error::OperationInProgress(current.kind));
        }
        *slot = Some(PendingOperation::submitted(kind));
        Ok(())
    }

    fn record_hash(&self, tx_hash: B256) {
        if let Some(op) = lock(&self.operation).as_mut() {
            op.tx_hash = Some(tx_hash);
        }
    }

    /// Settle the current operation, releasing the slot.
    fn settle(&self, status: OperationStatus) {
        if let Some(op) = lock(&self.operation).as_mut() {
            op.status = status;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(poller) = lock(&self.poller).take() {
            poller.abort();
        }
    }
}

/// Read the counter, then every listing in id order. Any failure aborts the
/// whole batch.
async fn read_listings(contract: &MarketplaceContract) -> Result<Vec<Listing>, ContractError> {
    let count = contract.listing_count().await?;
    let count: u64 = count
        .try_into()
        .map_err(|_| ContractError::Overflow(count.to_string()))?;

    let mut listings = Vec::new();
    for id in 0..count {
        let raw = contract.listing(id).await?;
        listings.push(Listing::from_raw(id, raw));
    }
    Ok(listings)
}

/// React to an account notification forwarded by the adapter.
fn on_accounts_changed(session: &Weak<Inner>, change: AccountsChanged) {
    let Some(inner) = session.upgrade() else {
        return;
    };

    match change {
        AccountsChanged::Switched(_) => {
            let Some(connection) = inner.adapter.connection() else {
                return;
            };
            if let Err(e) = inner.bind(connection) {
                warn!(error = %e, "failed to rebind after account switch");
                return;
            }
            info!(address = %connection.address, "session rebound to new account");
            inner.emit(SessionEvent::AccountChanged(connection));
            tokio::spawn(async move {
                // Failures are already reported through RefreshFailed.
                let _ = inner.refresh().await;
            });
        }
        AccountsChanged::Disconnected => {
            if inner.unbind() {
                info!("session disconnected by wallet");
                inner.emit(SessionEvent::Disconnected);
            }
        }
    }
}

/// The coordinating client-side session for the marketplace contract.
///
/// Cheap to clone; clones share one connection, one snapshot and one
/// operation slot.
///
/// # Example
///
/// ```rust,no_run
/// use apimarket_kit::*;
///
/// # async fn example() -> Result<(), Error> {
/// let session = MarketplaceSession::from_env()?;
/// session.connect().await?;
///
/// let mut listings = session.subscribe();
/// for listing in listings.borrow_and_update().iter() {
///     println!("{}: {}", listing.id, listing.name);
/// }
///
/// session.purchase_access(0, 10).await?;
/// session.withdraw_earnings().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MarketplaceSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MarketplaceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceSession")
            .field("contract_address", &self.inner.contract_address)
            .field("state", &self.state())
            .field("connection", &self.connection())
            .finish_non_exhaustive()
    }
}

impl MarketplaceSession {
    /// Start configuring a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Create a session from `APIMARKET_*` environment variables.
    ///
    /// See [`MarketConfig::from_env`].
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self::builder().config(MarketConfig::from_env()?).build())
    }

    fn from_parts(adapter: ChainAdapter, config: &MarketConfig) -> Self {
        let inner = Arc::new(Inner::new(adapter, config));
        let weak = Arc::downgrade(&inner);
        inner
            .adapter
            .on_accounts_changed(move |change| on_accounts_changed(&weak, change));
        Self { inner }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connect the wallet, prompting the user once for account access.
    ///
    /// On success the session binds a contract client, starts polling and
    /// runs an initial refresh. A failed initial refresh is reported through
    /// [`SessionEvent::RefreshFailed`] but does not fail the connect.
    pub async fn connect(&self) -> Result<WalletConnection, Error> {
        let connection = self.inner.adapter.connect().await?;
        self.establish(connection).await
    }

    /// Restore a previously authorized connection without prompting.
    pub async fn reconnect(&self) -> Result<WalletConnection, Error> {
        let connection = self.inner.adapter.reconnect().await?;
        self.establish(connection).await
    }

    async fn establish(&self, connection: WalletConnection) -> Result<WalletConnection, Error> {
        self.inner.bind(connection)?;
        poller::start(&self.inner);
        info!(
            address = %connection.address,
            chain_id = connection.chain_id,
            contract = %self.inner.contract_address,
            "marketplace session connected"
        );
        self.inner.emit(SessionEvent::Connected(connection));

        if let Err(e) = self.inner.refresh().await {
            debug!(error = %e, "initial refresh failed");
        }
        Ok(connection)
    }

    /// Drop the connection and cancel polling.
    ///
    /// An operation already submitted keeps running to confirmation.
    pub fn disconnect(&self) {
        self.inner.adapter.disconnect();
        if self.inner.unbind() {
            info!("marketplace session disconnected");
            self.inner.emit(SessionEvent::Disconnected);
        }
    }

    /// Disconnect and release this handle.
    ///
    /// The poller and account listener are cancelled before this returns.
    pub fn shutdown(self) {
        self.disconnect();
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        if lock(&self.inner.bound).connection.is_none() {
            SessionState::Disconnected
        } else if self.inner.is_polling() {
            SessionState::Polling
        } else {
            SessionState::Connected
        }
    }

    /// The active connection, if any.
    pub fn connection(&self) -> Option<WalletConnection> {
        lock(&self.inner.bound).connection
    }

    /// The marketplace contract address.
    pub fn contract_address(&self) -> Address {
        self.inner.contract_address
    }

    /// Stop the periodic refresh without disconnecting.
    pub fn pause_polling(&self) {
        self.inner.stop_polling();
    }

    /// Restart the periodic refresh.
    pub fn resume_polling(&self) -> Result<(), Error> {
        if self.connection().is_none() {
            return Err(Error::NotConnected);
        }
        if !self.inner.is_polling() {
            poller::start(&self.inner);
        }
        Ok(())
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Watch listing snapshots.
    ///
    /// The receiver always holds a complete collection: either the last
    /// good one or an empty one after a disconnect or account switch.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The current snapshot.
    pub fn listings(&self) -> Snapshot {
        Arc::clone(&self.inner.snapshot.borrow())
    }

    /// The operation currently awaiting confirmation, if any.
    pub fn pending(&self) -> Option<PendingOperation> {
        lock(&self.inner.operation)
            .clone()
            .filter(|op| !op.is_settled())
    }

    /// The most recent operation, settled or not.
    pub fn last_operation(&self) -> Option<PendingOperation> {
        lock(&self.inner.operation).clone()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Re-read every listing and publish a new snapshot.
    ///
    /// Either every read succeeds and a new snapshot replaces the old one,
    /// or the old snapshot stays and this returns [`Error::ReadFailure`].
    pub async fn refresh_listings(&self) -> Result<Snapshot, Error> {
        self.inner.refresh().await
    }

    /// Marketplace token balance of the connected account.
    pub async fn token_balance(&self) -> Result<TokenAmount, Error> {
        let contract = self.inner.contract()?;
        let owner = contract.signer().address();
        contract
            .token_balance(owner)
            .await
            .map(TokenAmount::from_u256)
            .map_err(|e| Error::ReadFailure(e.to_string()))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Validate and submit `call`, claiming the operation slot.
    ///
    /// Fails without any external call when not connected
    /// ([`Error::NotConnected`]), when the call targets a listing missing
    /// from the current snapshot ([`Error::UnknownListing`]), or when
    /// another operation is pending ([`Error::OperationInProgress`]).
    pub async fn begin(&self, call: MarketCall) -> Result<InFlight, Error> {
        operation::begin(&self.inner, call).await
    }

    /// Submit, confirm, then refresh.
    ///
    /// A refresh failure after confirmation is reported through
    /// [`SessionEvent::RefreshFailed`]; the receipt is still returned.
    pub async fn execute(&self, call: MarketCall) -> Result<TransactionReceipt, Error> {
        let receipt = self.begin(call).await?.confirm().await?;
        if let Err(e) = self.inner.refresh().await {
            debug!(error = %e, "refresh after confirmation failed");
        }
        Ok(receipt)
    }

    /// Register a new listing.
    ///
    /// Prices are in smallest token units; `subscription_duration` is in
    /// seconds.
    ///
    /// ```rust,no_run
    /// # use apimarket_kit::*;
    /// # async fn example(session: &MarketplaceSession) -> Result<(), Error> {
    /// session.register_listing("TestAPI", 100, 1000, 86_400).await?;
    /// session.register_listing("Weather", "0.5 tokens", "10 tokens", 30 * 86_400).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn register_listing(
        &self,
        name: impl Into<String>,
        price_per_request: impl IntoTokenAmount,
        subscription_price: impl IntoTokenAmount,
        subscription_duration: impl IntoTokenAmount,
    ) -> Result<TransactionReceipt, Error> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_input("name", "must not be empty"));
        }
        let price_per_request = validate("price_per_request", price_per_request)?;
        let subscription_price = validate("subscription_price", subscription_price)?;
        let subscription_duration = validate("subscription_duration", subscription_duration)?;

        self.execute(MarketCall::RegisterListing {
            name,
            price_per_request: price_per_request.as_u256(),
            subscription_price: subscription_price.as_u256(),
            subscription_duration: subscription_duration.as_u256(),
        })
        .await
    }

    /// Buy `request_count` requests against a listing.
    pub async fn purchase_access(
        &self,
        listing_id: u64,
        request_count: impl IntoTokenAmount,
    ) -> Result<TransactionReceipt, Error> {
        let request_count = validate("request_count", request_count)?;
        if request_count.is_zero() {
            return Err(Error::invalid_input("request_count", "must be greater than zero"));
        }
        self.execute(MarketCall::PurchaseAccess {
            listing_id,
            request_count: request_count.as_u256(),
        })
        .await
    }

    /// Buy one subscription period for a listing.
    pub async fn purchase_subscription(&self, listing_id: u64) -> Result<TransactionReceipt, Error> {
        self.execute(MarketCall::PurchaseSubscription { listing_id })
            .await
    }

    /// Consume one purchased request.
    pub async fn use_access(&self, listing_id: u64) -> Result<TransactionReceipt, Error> {
        self.execute(MarketCall::UseAccess { listing_id }).await
    }

    /// Withdraw the connected seller's accumulated earnings.
    pub async fn withdraw_earnings(&self) -> Result<TransactionReceipt, Error> {
        self.execute(MarketCall::WithdrawEarnings).await
    }
}

fn validate(field: &'static str, value: impl IntoTokenAmount) -> Result<TokenAmount, Error> {
    value
        .into_token_amount()
        .map_err(|e| Error::invalid_input(field, e))
}
