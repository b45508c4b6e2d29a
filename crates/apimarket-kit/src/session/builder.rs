//! Session builder.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tracing::warn;

use super::MarketplaceSession;
use crate::config::{MIN_POLL_INTERVAL, MarketConfig};
use crate::provider::{ChainAdapter, HttpWalletProvider, RetryConfig, WalletProvider};

/// Builder for a [`MarketplaceSession`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use apimarket_kit::*;
///
/// // Local dev chain with unlocked accounts
/// let session = MarketplaceSession::builder()
///     .rpc_url("http://127.0.0.1:8545")
///     .contract_address("0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap())
///     .poll_interval(Duration::from_secs(2))
///     .build();
///
/// // Injected wallet
/// # fn wallet() -> HttpWalletProvider { HttpWalletProvider::new("http://127.0.0.1:8545") }
/// let session = MarketplaceSession::builder()
///     .provider(wallet())
///     .build();
/// ```
#[derive(Default)]
pub struct SessionBuilder {
    config: MarketConfig,
    provider: Option<Arc<dyn WalletProvider>>,
}

impl SessionBuilder {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: MarketConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject a wallet capability. Takes precedence over
    /// [`rpc_url`](Self::rpc_url).
    pub fn provider(mut self, provider: impl WalletProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Inject a shared wallet capability.
    pub fn shared_provider(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Talk to a JSON-RPC node with unlocked accounts.
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = Some(url.into());
        self
    }

    /// Set the marketplace contract address.
    pub fn contract_address(mut self, address: Address) -> Self {
        self.config.contract_address = address;
        self
    }

    /// Set the background refresh interval.
    ///
    /// Values below [`MIN_POLL_INTERVAL`] (including zero) are raised to it
    /// by [`build`](Self::build).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set how often pending transactions are checked for a receipt.
    pub fn receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.config.receipt_poll_interval = interval;
        self
    }

    /// Set the retry policy of the HTTP provider.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Build the session. No network traffic happens until
    /// [`connect`](MarketplaceSession::connect).
    pub fn build(self) -> MarketplaceSession {
        let SessionBuilder { mut config, provider } = self;
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = config.poll_interval.as_millis() as u64,
                "poll interval below minimum, using {:?}",
                MIN_POLL_INTERVAL
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        let provider = provider.or_else(|| {
            config.rpc_url.clone().map(|url| {
                Arc::new(HttpWalletProvider::with_retry_config(url, config.retry.clone()))
                    as Arc<dyn WalletProvider>
            })
        });
        MarketplaceSession::from_parts(ChainAdapter::new(provider), &config)
    }
}

impl From<SessionBuilder> for MarketplaceSession {
    fn from(builder: SessionBuilder) -> Self {
        builder.build()
    }
}
