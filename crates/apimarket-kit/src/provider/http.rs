//! JSON-RPC wallet provider over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::{RequestFuture, WalletProvider};
use crate::error::ProviderError;

/// Retry configuration for RPC calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries.
    pub max_retries: u32,
    /// Initial delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(
            self.initial_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

/// JSON-RPC request structure.
#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a serde_json::Value,
}

/// JSON-RPC response structure.
#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Wallet provider backed by a node's JSON-RPC endpoint.
///
/// Suitable for local development chains (anvil, hardhat) where the node
/// holds unlocked accounts and signs `eth_sendTransaction` itself. There is
/// no permission prompt: `eth_requestAccounts` is answered from
/// `eth_accounts`. HTTP has no push channel, so [`account_events`] never
/// fires.
///
/// [`account_events`]: WalletProvider::account_events
pub struct HttpWalletProvider {
    url: String,
    client: reqwest::Client,
    retry_config: RetryConfig,
    request_id: AtomicU64,
    accounts_tx: broadcast::Sender<Vec<Address>>,
}

impl HttpWalletProvider {
    /// Create a new provider with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_retry_config(url, RetryConfig::default())
    }

    /// Create a new provider with custom retry configuration.
    pub fn with_retry_config(url: impl Into<String>, retry_config: RetryConfig) -> Self {
        let (accounts_tx, _) = broadcast::channel(1);
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            retry_config,
            request_id: AtomicU64::new(0),
            accounts_tx,
        }
    }

    /// Get the RPC URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a raw RPC call with retries.
    ///
    /// Only idempotent methods are retried. `eth_sendTransaction` and
    /// `eth_requestAccounts` are sent exactly once.
    pub async fn call(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let max_retries = if is_idempotent(method) {
            self.retry_config.max_retries
        } else {
            0
        };
        let method = node_method(method);
        let total_attempts = max_retries + 1;

        for attempt in 0..total_attempts {
            let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);

            let request = JsonRpcRequest {
                jsonrpc: "2.0",
                id: request_id,
                method,
                params,
            };

            match self.try_call(&request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < total_attempts - 1 => {
                    let delay = self.retry_config.delay_for(attempt);
                    debug!(method, attempt, ?delay, error = %e, "retrying RPC call");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProviderError::Timeout(total_attempts))
    }

    /// Single attempt to make an RPC call.
    async fn try_call(&self, request: &JsonRpcRequest<'_>) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let retryable = is_retryable_status(status.as_u16());
            return Err(ProviderError::network(
                format!("HTTP {}: {}", status, body),
                Some(status.as_u16()),
                retryable,
            ));
        }

        parse_response(&body)
    }
}

impl WalletProvider for HttpWalletProvider {
    fn request<'a>(&'a self, method: &'a str, params: serde_json::Value) -> RequestFuture<'a> {
        Box::pin(async move { self.call(method, &params).await })
    }

    fn account_events(&self) -> broadcast::Receiver<Vec<Address>> {
        self.accounts_tx.subscribe()
    }
}

/// Map wallet-only methods onto what a node understands.
fn node_method(method: &str) -> &str {
    match method {
        "eth_requestAccounts" => "eth_accounts",
        other => other,
    }
}

/// Whether resending `method` after an ambiguous failure is safe.
fn is_idempotent(method: &str) -> bool {
    !matches!(
        method,
        "eth_sendTransaction" | "eth_sendRawTransaction" | "eth_requestAccounts"
    )
}

/// Decode a JSON-RPC response body.
///
/// `result: null` is a valid result (e.g. a pending receipt) and is
/// returned as `Value::Null`.
fn parse_response(body: &str) -> Result<serde_json::Value, ProviderError> {
    let response: JsonRpcResponse = serde_json::from_str(body)?;

    if let Some(error) = response.error {
        return Err(ProviderError::from_rpc(error.code, error.message, error.data));
    }

    Ok(response.result.unwrap_or(serde_json::Value::Null))
}

/// Check if an HTTP status code is retryable.
fn is_retryable_status(status: u16) -> bool {
    // 408 Request Timeout - retryable
    // 429 Too Many Requests - retryable (rate limiting)
    // 503 Service Unavailable - retryable
    // 5xx Server Errors - retryable
    status == 408 || status == 429 || status == 503 || (500..600).contains(&status)
}
