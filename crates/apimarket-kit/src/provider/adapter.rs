//! Chain provider adapter: connection lifecycle over a wallet provider.

use std::fmt;
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, U64};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{WalletProvider, WalletSigner, request_as};
use crate::error::{Error, ProviderError};
use crate::lock;
use crate::types::{AccountsChanged, WalletConnection};

/// Callback invoked on account switches and wallet disconnection.
pub type AccountsHandler = Arc<dyn Fn(AccountsChanged) + Send + Sync>;

/// State shared with the account-change forwarder task.
#[derive(Default)]
struct Shared {
    connection: Mutex<Option<WalletConnection>>,
    handler: Mutex<Option<AccountsHandler>>,
}

impl Shared {
    /// Apply an account change to the stored connection.
    ///
    /// Returns false when the change is irrelevant: nothing is connected, or
    /// the wallet re-announced the account already in use.
    fn apply(&self, change: AccountsChanged) -> bool {
        let mut connection = lock(&self.connection);
        let Some(current) = connection.as_mut() else {
            return false;
        };
        match change {
            AccountsChanged::Switched(address) if current.address == address => false,
            AccountsChanged::Switched(address) => {
                current.address = address;
                true
            }
            AccountsChanged::Disconnected => {
                *connection = None;
                true
            }
        }
    }

    fn handler(&self) -> Option<AccountsHandler> {
        lock(&self.handler).clone()
    }
}

/// Wraps an injected [`WalletProvider`] with the connect / reconnect /
/// signer lifecycle.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use apimarket_kit::*;
///
/// # async fn example() -> Result<(), Error> {
/// let provider: Arc<dyn WalletProvider> = Arc::new(HttpWalletProvider::new("http://127.0.0.1:8545"));
/// let adapter = ChainAdapter::new(Some(provider));
///
/// let connection = adapter.connect().await?;
/// println!("Connected {} on chain {}", connection.address, connection.chain_id);
///
/// adapter.on_accounts_changed(|change| println!("accounts changed: {:?}", change));
/// let signer = adapter.signer()?;
/// # Ok(())
/// # }
/// ```
pub struct ChainAdapter {
    provider: Option<Arc<dyn WalletProvider>>,
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ChainAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainAdapter")
            .field("has_provider", &self.provider.is_some())
            .field("connection", &self.connection())
            .finish_non_exhaustive()
    }
}

impl ChainAdapter {
    /// Create an adapter over a wallet capability.
    ///
    /// `None` models an environment without a wallet: every connect attempt
    /// fails with [`Error::ProviderUnavailable`].
    pub fn new(provider: Option<Arc<dyn WalletProvider>>) -> Self {
        Self {
            provider,
            shared: Arc::new(Shared::default()),
            listener: Mutex::new(None),
        }
    }

    /// Returns true if a wallet capability was supplied.
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// The active connection, if any.
    pub fn connection(&self) -> Option<WalletConnection> {
        *lock(&self.shared.connection)
    }

    /// Request account access from the wallet.
    ///
    /// Triggers exactly one permission prompt (`eth_requestAccounts`), takes
    /// the first authorized account and starts listening for account changes.
    pub async fn connect(&self) -> Result<WalletConnection, Error> {
        let provider = self.provider()?;
        let accounts: Vec<Address> =
            request_as(provider.as_ref(), "eth_requestAccounts", json!([]))
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;

        let address = accounts
            .first()
            .copied()
            .ok_or_else(|| Error::Connection("wallet returned no accounts".to_string()))?;

        self.establish(provider, address).await
    }

    /// Restore a connection the user already authorized, without prompting.
    ///
    /// Uses `eth_accounts` only. Fails with [`Error::NotConnected`] when no
    /// account is authorized yet.
    pub async fn reconnect(&self) -> Result<WalletConnection, Error> {
        let provider = self.provider()?;
        let accounts: Vec<Address> = request_as(provider.as_ref(), "eth_accounts", json!([]))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let address = accounts.first().copied().ok_or(Error::NotConnected)?;
        self.establish(provider, address).await
    }

    /// Forget the current connection and stop listening for account changes.
    pub fn disconnect(&self) {
        lock(&self.shared.connection).take();
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
    }

    /// Register the account-change callback.
    ///
    /// Registering again replaces the previous callback; callbacks never
    /// stack. The callback runs on the listener task and must not block.
    pub fn on_accounts_changed(&self, handler: impl Fn(AccountsChanged) + Send + Sync + 'static) {
        *lock(&self.shared.handler) = Some(Arc::new(handler));
    }

    /// A signer bound to the currently connected account.
    pub fn signer(&self) -> Result<WalletSigner, Error> {
        let provider = self.provider()?;
        let connection = self.connection().ok_or(Error::NotConnected)?;
        Ok(WalletSigner::new(connection.address, provider))
    }

    fn provider(&self) -> Result<Arc<dyn WalletProvider>, Error> {
        self.provider.clone().ok_or(Error::ProviderUnavailable)
    }

    async fn establish(
        &self,
        provider: Arc<dyn WalletProvider>,
        address: Address,
    ) -> Result<WalletConnection, Error> {
        let chain_id = chain_id(provider.as_ref())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let connection = WalletConnection { address, chain_id };
        *lock(&self.shared.connection) = Some(connection);
        self.start_listener(provider);

        info!(%address, chain_id, "wallet connected");
        Ok(connection)
    }

    /// Start a fresh account-change forwarder, replacing any previous one.
    ///
    /// A previous forwarder may still be delivering a disconnect, so it is
    /// never reused.
    fn start_listener(&self, provider: Arc<dyn WalletProvider>) {
        // Subscribe before spawning so no event between here and the first
        // poll of the task is lost.
        let mut events = provider.account_events();
        let shared = Arc::clone(&self.shared);

        let task = tokio::spawn(async move {
            loop {
                let accounts = match events.recv().await {
                    Ok(accounts) => accounts,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed account change notifications");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let change = AccountsChanged::from_accounts(&accounts);
                if !shared.apply(change) {
                    debug!(?change, "ignoring account notification");
                    continue;
                }

                match change {
                    AccountsChanged::Switched(address) => info!(%address, "wallet account switched"),
                    AccountsChanged::Disconnected => info!("wallet disconnected"),
                }

                if let Some(handler) = shared.handler() {
                    handler(change);
                }

                if change == AccountsChanged::Disconnected {
                    break;
                }
            }
        });

        if let Some(previous) = lock(&self.listener).replace(task) {
            previous.abort();
        }
    }
}

impl Drop for ChainAdapter {
    fn drop(&mut self) {
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
    }
}

/// Read the active chain id.
async fn chain_id(provider: &dyn WalletProvider) -> Result<u64, ProviderError> {
    let chain_id: U64 = request_as(provider, "eth_chainId", json!([])).await?;
    Ok(chain_id.to::<u64>())
}
