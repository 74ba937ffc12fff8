//! Identity module: the wallet boundary.
//!
//! An `IdentityProvider` names the account that keys ledger records and signs
//! the unlock message for the signature scheme. Providers are passed into the
//! session and the oracle explicitly; there is no process-wide wallet handle.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Address;
use serde_json::{json, Value};

use crate::error::VaultError;
use crate::transport::RpcClient;

pub trait IdentityProvider: Send + Sync {
    /// Accounts the wallet exposes, primary first. May prompt the user.
    fn request_accounts(&self) -> Result<Vec<Address>, VaultError>;

    /// Sign `message` as `address`. Returns the signature as the wallet
    /// reports it (normally `0x`-prefixed hex).
    fn sign_message(&self, address: &Address, message: &str) -> Result<String, VaultError>;

    fn primary_account(&self) -> Result<Address, VaultError> {
        self.request_accounts()?
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::LedgerUnavailable("wallet exposed no accounts".into()))
    }
}

/// Wallet reached over JSON-RPC (`eth_requestAccounts`, `personal_sign`).
#[derive(Debug, Clone)]
pub struct RpcWallet {
    rpc: Arc<RpcClient>,
}

impl RpcWallet {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

/// `personal_sign` takes the hex-encoded message first and the account second.
pub fn personal_sign_params(address: &Address, message: &str) -> Value {
    json!([format!("0x{}", hex::encode(message.as_bytes())), address.to_string()])
}

fn parse_accounts(raw: Vec<String>) -> Result<Vec<Address>, VaultError> {
    raw.iter()
        .map(|s| {
            Address::from_str(s.trim()).map_err(|_| {
                VaultError::LedgerUnavailable(format!("wallet returned an invalid address: {}", s))
            })
        })
        .collect()
}

impl IdentityProvider for RpcWallet {
    fn request_accounts(&self) -> Result<Vec<Address>, VaultError> {
        let raw: Vec<String> = self.rpc.call("eth_requestAccounts", json!([]))?;
        let accounts = parse_accounts(raw)?;
        tracing::debug!(count = accounts.len(), "wallet accounts");
        Ok(accounts)
    }

    fn sign_message(&self, address: &Address, message: &str) -> Result<String, VaultError> {
        tracing::info!(%address, "requesting wallet signature");
        let signature: String = self
            .rpc
            .call("personal_sign", personal_sign_params(address, message))?;
        Ok(signature)
    }
}

/// Fixed, configured identity. Reads ledger records but cannot sign, so it
/// only supports password vaults and read-only verification.
#[derive(Debug, Clone, Copy)]
pub struct StaticIdentity {
    address: Address,
}

impl StaticIdentity {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

impl IdentityProvider for StaticIdentity {
    fn request_accounts(&self) -> Result<Vec<Address>, VaultError> {
        Ok(vec![self.address])
    }

    fn sign_message(&self, address: &Address, _message: &str) -> Result<String, VaultError> {
        Err(VaultError::LedgerUnavailable(format!(
            "static identity {} cannot sign messages",
            address
        )))
    }
}
