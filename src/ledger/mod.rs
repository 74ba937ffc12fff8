//! Ledger module: the integrity oracle and the ledgers behind it.
//!
//! A ledger holds one 32-byte digest per identity, last write wins. A record
//! that was never written reads back as the zero digest, which no envelope
//! fingerprint ever equals.
//!
//! Backends:
//!   - `RegistryContract`: the deployed VaultRegistry contract over JSON-RPC
//!   - `FileLedger`: a local JSON map, for single-machine setups
//!   - `MemoryLedger`: shared in-memory map, for tests and embedding

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy_primitives::{keccak256, Address, B256};
use serde::Deserialize;
use serde_json::json;

use crate::crypto::CipherError;
use crate::error::VaultError;
use crate::identity::IdentityProvider;
use crate::record::{fingerprint, short_fingerprint, Digest, EncryptedEnvelope};
use crate::transport::{RpcClient, RpcError};

/// Deployed VaultRegistry contract.
pub const DEFAULT_REGISTRY: &str = "0x21cBB414F4C6B0646040D9Dc2e7D5189aD6dfA15";

pub const UPDATE_VAULT_HASH_SIG: &str = "updateVaultHash(bytes32)";
pub const GET_VAULT_HASH_SIG: &str = "getVaultHash(address)";

pub trait Ledger: Send + Sync {
    /// Record `digest` as the latest fingerprint for `identity` and wait until
    /// the write is durable.
    ///
    /// `LedgerRejected` and `UserRejected` mean nothing was written.
    /// `PublishUnconfirmed` means the write was submitted and may still land.
    fn update_hash(&self, identity: &Address, digest: Digest) -> Result<(), VaultError>;

    /// Current record for `identity`; the zero digest when none exists.
    fn get_hash(&self, identity: &Address) -> Result<Digest, VaultError>;

    /// Short human-readable description for status output.
    fn describe(&self) -> String;
}

/// 0x-prefixed lowercase hex of a digest.
pub fn digest_hex(digest: &Digest) -> String {
    format!("0x{}", hex::encode(digest.as_slice()))
}

fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

// ── IntegrityOracle ────────────────────────────────────────────────────────

/// Fingerprints envelopes and compares them with the ledger record of an identity.
#[derive(Clone)]
pub struct IntegrityOracle {
    ledger: Arc<dyn Ledger>,
    identity: Arc<dyn IdentityProvider>,
}

impl IntegrityOracle {
    pub fn new(ledger: Arc<dyn Ledger>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { ledger, identity }
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    /// The identity whose ledger record guards the vault.
    pub fn identity(&self) -> Result<Address, VaultError> {
        self.identity.primary_account()
    }

    pub fn fingerprint(envelope: &EncryptedEnvelope) -> Result<Digest, VaultError> {
        fingerprint(envelope)
            .map_err(|e| VaultError::CorruptEnvelope(CipherError::MalformedEnvelope(e.to_string())))
    }

    /// Publish the envelope's fingerprint as the latest record for `identity`.
    /// Only call this after the envelope has been durably saved.
    pub fn publish(
        &self,
        envelope: &EncryptedEnvelope,
        identity: &Address,
    ) -> Result<Digest, VaultError> {
        let digest = Self::fingerprint(envelope)?;
        tracing::info!(
            %identity,
            fingerprint = %short_fingerprint(&digest),
            ledger = %self.ledger.describe(),
            "publishing vault fingerprint"
        );
        self.ledger.update_hash(identity, digest)?;
        Ok(digest)
    }

    /// Compare the envelope's fingerprint with the ledger record. A mismatch
    /// is `Ok(false)`; only an unreadable record is an error.
    pub fn verify(&self, envelope: &EncryptedEnvelope, identity: &Address) -> Result<bool, VaultError> {
        let local = Self::fingerprint(envelope)?;
        let remote = self.ledger.get_hash(identity)?;
        if remote == B256::ZERO {
            tracing::warn!(%identity, "ledger holds no fingerprint for this identity");
        }
        let matches = local == remote;
        if matches {
            tracing::debug!(%identity, fingerprint = %short_fingerprint(&local), "fingerprint verified");
        } else {
            tracing::warn!(
                %identity,
                local = %short_fingerprint(&local),
                ledger = %short_fingerprint(&remote),
                "fingerprint mismatch"
            );
        }
        Ok(matches)
    }
}

impl std::fmt::Debug for IntegrityOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityOracle")
            .field("ledger", &self.ledger.describe())
            .finish()
    }
}

// ── RegistryContract ───────────────────────────────────────────────────────

/// First four bytes of keccak256 of a Solidity function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for `updateVaultHash(bytes32)`.
pub fn encode_update_vault_hash(digest: &Digest) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32);
    data.extend_from_slice(&selector(UPDATE_VAULT_HASH_SIG));
    data.extend_from_slice(digest.as_slice());
    data
}

/// Calldata for `getVaultHash(address)`: the address left-padded to one word.
pub fn encode_get_vault_hash(identity: &Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32);
    data.extend_from_slice(&selector(GET_VAULT_HASH_SIG));
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(identity.as_slice());
    data
}

/// Decode a `bytes32` return value from `eth_call` hex output.
pub fn decode_bytes32(output: &str) -> Result<Digest, VaultError> {
    let body = output.trim().trim_start_matches("0x");
    if body.is_empty() {
        return Err(VaultError::LedgerUnavailable(
            "registry returned no data; is the contract deployed on this chain?".into(),
        ));
    }
    let bytes = hex::decode(body)
        .map_err(|e| VaultError::LedgerUnavailable(format!("registry returned invalid hex: {}", e)))?;
    if bytes.len() < 32 {
        return Err(VaultError::LedgerUnavailable(format!(
            "registry returned {} bytes, expected 32",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes[..32]))
}

#[derive(Deserialize)]
struct TransactionReceipt {
    #[serde(default)]
    status: Option<String>,
}

/// Outcome of one receipt poll.
#[derive(Debug, PartialEq, Eq)]
enum ReceiptState {
    Pending,
    Confirmed,
    Reverted(String),
}

fn receipt_state(receipt: Option<TransactionReceipt>) -> ReceiptState {
    match receipt {
        None => ReceiptState::Pending,
        Some(TransactionReceipt { status: None }) => ReceiptState::Confirmed,
        Some(TransactionReceipt { status: Some(s) }) => {
            match u64::from_str_radix(s.trim_start_matches("0x"), 16) {
                Ok(1) => ReceiptState::Confirmed,
                _ => ReceiptState::Reverted(s),
            }
        }
    }
}

/// A submission the node refused outright is a rejection; a declined wallet
/// prompt is the user's; anything else means the node was not reachable.
fn map_send_error(err: RpcError) -> VaultError {
    match err {
        e if e.is_user_rejection() => VaultError::UserRejected,
        RpcError::Remote { message, .. } => VaultError::LedgerRejected(message),
        other => VaultError::LedgerUnavailable(other.to_string()),
    }
}

/// VaultRegistry contract reached through a JSON-RPC node or wallet.
#[derive(Debug, Clone)]
pub struct RegistryContract {
    rpc: Arc<RpcClient>,
    address: Address,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl RegistryContract {
    pub fn new(rpc: Arc<RpcClient>, address: Address) -> Self {
        Self {
            rpc,
            address,
            confirm_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(1500),
        }
    }

    pub fn with_confirmation(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirm_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Poll until the receipt of an accepted transaction shows up. Past this
    /// point nothing can be reported as "not written": a lost poll or the
    /// deadline is `PublishUnconfirmed`.
    fn wait_for_receipt(&self, tx_hash: &str) -> Result<(), VaultError> {
        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            let receipt: Option<TransactionReceipt> = self
                .rpc
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .map_err(|e| {
                    VaultError::PublishUnconfirmed(format!("transaction {}: {}", tx_hash, e))
                })?;
            match receipt_state(receipt) {
                ReceiptState::Confirmed => {
                    tracing::info!(tx = tx_hash, "vault fingerprint confirmed");
                    return Ok(());
                }
                ReceiptState::Reverted(status) => {
                    return Err(VaultError::LedgerRejected(format!(
                        "transaction {} failed with status {}",
                        tx_hash, status
                    )));
                }
                ReceiptState::Pending => {}
            }
            if Instant::now() >= deadline {
                return Err(VaultError::PublishUnconfirmed(format!(
                    "transaction {} not confirmed within {}ms",
                    tx_hash,
                    self.confirm_timeout.as_millis()
                )));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl Ledger for RegistryContract {
    fn update_hash(&self, identity: &Address, digest: Digest) -> Result<(), VaultError> {
        let data = format!("0x{}", hex::encode(encode_update_vault_hash(&digest)));
        let tx_hash: String = self
            .rpc
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": address_hex(identity),
                    "to": address_hex(&self.address),
                    "data": data,
                }]),
            )
            .map_err(map_send_error)?;
        tracing::debug!(tx = %tx_hash, "updateVaultHash submitted");
        self.wait_for_receipt(&tx_hash)
    }

    fn get_hash(&self, identity: &Address) -> Result<Digest, VaultError> {
        let data = format!("0x{}", hex::encode(encode_get_vault_hash(identity)));
        let output: String = self.rpc.call(
            "eth_call",
            json!([{ "to": address_hex(&self.address), "data": data }, "latest"]),
        )?;
        decode_bytes32(&output)
    }

    fn describe(&self) -> String {
        format!("registry {} via {}", self.address, self.rpc.url())
    }
}

// ── FileLedger ─────────────────────────────────────────────────────────────

/// Local JSON registry: `{"0x<address>": "0x<digest>"}`.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, VaultError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(VaultError::LedgerUnavailable(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&raw).map_err(|e| {
            VaultError::LedgerUnavailable(format!("{} is not a valid ledger: {}", self.path.display(), e))
        })
    }
}

impl Ledger for FileLedger {
    fn update_hash(&self, identity: &Address, digest: Digest) -> Result<(), VaultError> {
        let mut map = self.read_map()?;
        map.insert(address_hex(identity), digest_hex(&digest));
        let json = serde_json::to_string_pretty(&map)
            .map_err(|e| VaultError::LedgerRejected(e.to_string()))?;
        crate::store::write_atomic(&self.path, json.as_bytes()).map_err(|e| {
            VaultError::LedgerUnavailable(format!("cannot write {}: {}", self.path.display(), e))
        })
    }

    fn get_hash(&self, identity: &Address) -> Result<Digest, VaultError> {
        match self.read_map()?.get(&address_hex(identity)) {
            Some(value) => B256::from_str(value).map_err(|e| {
                VaultError::LedgerUnavailable(format!("invalid digest for {}: {}", identity, e))
            }),
            None => Ok(B256::ZERO),
        }
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

// ── MemoryLedger ───────────────────────────────────────────────────────────

/// In-memory ledger. Clones share records and switches, so a test can keep a
/// handle to tamper with records or take the ledger offline.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    records: Arc<Mutex<HashMap<Address, Digest>>>,
    offline: Arc<AtomicBool>,
    reject_writes: Arc<AtomicBool>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record directly, bypassing `update_hash`.
    pub fn set_record(&self, identity: Address, digest: Digest) {
        match self.records.lock() {
            Ok(mut records) => records.insert(identity, digest),
            Err(poisoned) => poisoned.into_inner().insert(identity, digest),
        };
    }

    pub fn record(&self, identity: &Address) -> Option<Digest> {
        match self.records.lock() {
            Ok(records) => records.get(identity).copied(),
            Err(poisoned) => poisoned.into_inner().get(identity).copied(),
        }
    }

    /// While offline every call fails with `LedgerUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While set, `update_hash` fails with `LedgerRejected`.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), VaultError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(VaultError::LedgerUnavailable("memory ledger is offline".into()));
        }
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn update_hash(&self, identity: &Address, digest: Digest) -> Result<(), VaultError> {
        self.check_online()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(VaultError::LedgerRejected("memory ledger rejects writes".into()));
        }
        self.set_record(*identity, digest);
        Ok(())
    }

    fn get_hash(&self, identity: &Address) -> Result<Digest, VaultError> {
        self.check_online()?;
        Ok(self.record(identity).unwrap_or(B256::ZERO))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
