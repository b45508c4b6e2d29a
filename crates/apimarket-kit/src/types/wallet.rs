//! Wallet connection state.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// The active wallet account and the chain it is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletConnection {
    pub address: Address,
    pub chain_id: u64,
}

/// What an account-change notification from the wallet means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountsChanged {
    /// The wallet's active account is now this address.
    Switched(Address),
    /// The wallet reported an empty account list.
    Disconnected,
}

impl AccountsChanged {
    /// Interpret a raw `accountsChanged` payload.
    pub fn from_accounts(accounts: &[Address]) -> Self {
        match accounts.first() {
            Some(address) => AccountsChanged::Switched(*address),
            None => AccountsChanged::Disconnected,
        }
    }
}

/// Session connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No wallet connection (initial state).
    Disconnected,
    /// Connected, with no refresh timer running.
    Connected,
    /// Connected, with the periodic refresh timer running.
    Polling,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}
