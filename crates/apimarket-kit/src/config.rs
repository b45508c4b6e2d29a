//! Session configuration.

use std::time::Duration;

use alloy_primitives::{Address, address};

use crate::contract::DEFAULT_RECEIPT_POLL_INTERVAL;
use crate::error::Error;
use crate::provider::RetryConfig;

/// Address of the deployed marketplace contract.
pub const DEFAULT_CONTRACT_ADDRESS: Address = address!("d119f71ad07cC8D59d3000e9387Cb559eC33dB78");

/// Interval between background listing refreshes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest refresh interval a session accepts; shorter values are raised
/// to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Environment variable holding the node / wallet JSON-RPC URL.
pub const ENV_RPC_URL: &str = "APIMARKET_RPC_URL";
/// Environment variable overriding the contract address.
pub const ENV_CONTRACT_ADDRESS: &str = "APIMARKET_CONTRACT_ADDRESS";
/// Environment variable overriding the poll interval, in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "APIMARKET_POLL_INTERVAL_MS";

/// Configuration for a [`MarketplaceSession`](crate::MarketplaceSession).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketConfig {
    /// JSON-RPC endpoint used to build an [`HttpWalletProvider`](crate::HttpWalletProvider)
    /// when no provider is injected. `None` means no wallet is available.
    pub rpc_url: Option<String>,
    /// Marketplace contract address.
    pub contract_address: Address,
    /// Background refresh interval while connected.
    pub poll_interval: Duration,
    /// Interval between receipt polls while a transaction is pending.
    pub receipt_poll_interval: Duration,
    /// Retry policy for the HTTP provider.
    pub retry: RetryConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: DEFAULT_CONTRACT_ADDRESS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            retry: RetryConfig::default(),
        }
    }
}

impl MarketConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `APIMARKET_RPC_URL` (optional): JSON-RPC endpoint. Without it the
    ///   session has no wallet and `connect()` fails with
    ///   [`Error::ProviderUnavailable`].
    /// - `APIMARKET_CONTRACT_ADDRESS` (optional): contract address, defaults
    ///   to [`DEFAULT_CONTRACT_ADDRESS`].
    /// - `APIMARKET_POLL_INTERVAL_MS` (optional): refresh interval, defaults
    ///   to 5000.
    ///
    /// # Example
    ///
    /// ```bash
    /// export APIMARKET_RPC_URL=http://127.0.0.1:8545
    /// export APIMARKET_CONTRACT_ADDRESS=0x5FbDB2315678afecb367f032d93F642f64180aa3
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_RPC_URL) {
            let url = url.trim();
            if url.is_empty() {
                return Err(Error::Config(format!("{} is set but empty", ENV_RPC_URL)));
            }
            config.rpc_url = Some(url.to_string());
        }

        if let Some(address) = lookup(ENV_CONTRACT_ADDRESS) {
            config.contract_address = address.trim().parse().map_err(|e| {
                Error::Config(format!(
                    "{} is not a valid address '{}': {}",
                    ENV_CONTRACT_ADDRESS, address, e
                ))
            })?;
        }

        if let Some(interval) = lookup(ENV_POLL_INTERVAL_MS) {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a whole number of milliseconds, got '{}'",
                    ENV_POLL_INTERVAL_MS, interval
                ))
            })?;
            if millis == 0 {
                return Err(Error::Config(format!("{} must be positive", ENV_POLL_INTERVAL_MS)));
            }
            config.poll_interval = Duration::from_millis(millis);
        }

        Ok(config)
    }
}
