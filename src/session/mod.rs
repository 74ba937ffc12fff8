//! Session module: the vault lifecycle.
//!
//! `VaultSession` composes the store, the cipher, the wallet and the integrity
//! oracle. `create`, `unlock`, `mutate` and `lock` run one at a time behind a
//! single-flight guard; `status` never waits on them.
//!
//! State machine:
//!   Uninitialized -> probe -> NoVaultFound | VaultLocked
//!   NoVaultFound  -> create -> Unlocked
//!   VaultLocked | Locked | LockFailed -> unlock -> Unlocking -> Unlocked | LockFailed
//!   Unlocked -> mutate -> Unlocked (all or nothing)
//!   Unlocked -> lock -> Locked
//!
//! Unlock decrypts locally first, then checks the ledger, and exposes the vault
//! only when both pass. Persist-then-publish is strict on every write.
//!
//! A failed publish is only rolled back when the write certainly did not land.
//! A submitted but unconfirmed write keeps the new envelope and surfaces
//! `PublishUnconfirmed`; `confirm_published` checks it again later.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_primitives::Address;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::{self, unlock_message, CipherError, VaultKey};
use crate::error::VaultError;
use crate::identity::IdentityProvider;
use crate::ledger::IntegrityOracle;
use crate::record::{EncryptedEnvelope, Vault};
use crate::store::VaultStore;

/// Bytes of randomness in a per-vault signing challenge.
const CHALLENGE_LEN: usize = 16;

/// The secret a caller unlocks or creates a vault with.
pub enum Credential {
    Password(Zeroizing<String>),
    /// Ask the configured wallet to sign the unlock message.
    Wallet,
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Credential::Password(Zeroizing::new(password.into()))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Credential::Password(..)"),
            Credential::Wallet => f.write_str("Credential::Wallet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    NoVaultFound,
    VaultLocked,
    Unlocking,
    Unlocked,
    LockFailed,
    Locked,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::NoVaultFound => "no vault",
            SessionStatus::VaultLocked => "locked",
            SessionStatus::Unlocking => "unlocking",
            SessionStatus::Unlocked => "unlocked",
            SessionStatus::LockFailed => "unlock failed",
            SessionStatus::Locked => "locked",
        };
        f.write_str(label)
    }
}

/// Everything that exists only while unlocked. Dropping it zeroes the key
/// and every account's fields.
struct ActiveVault {
    vault: Vault,
    key: Arc<VaultKey>,
    envelope: EncryptedEnvelope,
    /// Ledger identity resolved at unlock; `None` when no oracle is configured.
    identity: Option<Address>,
}

enum SessionState {
    Uninitialized,
    NoVaultFound,
    VaultLocked,
    Unlocking,
    Unlocked(ActiveVault),
    LockFailed,
    Locked,
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::NoVaultFound => SessionStatus::NoVaultFound,
            SessionState::VaultLocked => SessionStatus::VaultLocked,
            SessionState::Unlocking => SessionStatus::Unlocking,
            SessionState::Unlocked(_) => SessionStatus::Unlocked,
            SessionState::LockFailed => SessionStatus::LockFailed,
            SessionState::Locked => SessionStatus::Locked,
        }
    }
}

/// Where a publish attempt left the ledger.
enum PublishOutcome {
    Landed,
    /// Submitted, may still land. The new envelope must stay persisted.
    Pending(VaultError),
    NotLanded(VaultError),
}

pub struct VaultSession {
    store: Arc<dyn VaultStore>,
    identity: Option<Arc<dyn IdentityProvider>>,
    oracle: Option<IntegrityOracle>,
    bind_vault_nonce: bool,
    flight: Mutex<()>,
    state: Mutex<SessionState>,
}

impl VaultSession {
    /// Session over `store` with no wallet and no integrity oracle.
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self {
            store,
            identity: None,
            oracle: None,
            bind_vault_nonce: true,
            flight: Mutex::new(()),
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    /// Wallet used for `Credential::Wallet`.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_oracle(mut self, oracle: IntegrityOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Whether new signature vaults bind their signature to a random challenge.
    pub fn with_bind_vault_nonce(mut self, bind: bool) -> Self {
        self.bind_vault_nonce = bind;
        self
    }

    pub fn oracle(&self) -> Option<&IntegrityOracle> {
        self.oracle.as_ref()
    }

    pub fn store(&self) -> &dyn VaultStore {
        self.store.as_ref()
    }

    fn single_flight(&self) -> MutexGuard<'_, ()> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state();
        tracing::debug!(from = %state.status(), to = %next.status(), "session transition");
        *state = next;
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status()
    }

    /// Look for a stored vault and settle the initial state. An unlocked
    /// session is left as it is.
    pub fn probe(&self) -> Result<SessionStatus, VaultError> {
        let _flight = self.single_flight();
        if self.status() == SessionStatus::Unlocked {
            return Ok(SessionStatus::Unlocked);
        }
        let next = match self.store.load()? {
            Some(_) => SessionState::VaultLocked,
            None => SessionState::NoVaultFound,
        };
        let status = next.status();
        self.set_state(next);
        Ok(status)
    }

    /// Create an empty vault, persist it, publish its fingerprint, and unlock it.
    ///
    /// If the publish fails the saved slot is cleared again so that no
    /// unverifiable vault is left behind.
    pub fn create(&self, credential: Credential) -> Result<(), VaultError> {
        let _flight = self.single_flight();

        if self.store.load()?.is_some() {
            if self.status() != SessionStatus::Unlocked {
                self.set_state(SessionState::VaultLocked);
            }
            return Err(VaultError::VaultAlreadyExists);
        }

        let identity = match &self.oracle {
            Some(oracle) => Some(oracle.identity()?),
            None => None,
        };
        let key = self.key_for_new_vault(credential)?;
        let vault = Vault::default();
        let envelope = crypto::encrypt(&vault, &key)?;

        self.store.save(&envelope)?;

        let outcome = self.publish(&envelope, identity);
        let scheme = envelope.scheme();
        let active = ActiveVault {
            vault,
            key: Arc::new(key),
            envelope,
            identity,
        };
        match outcome {
            PublishOutcome::Landed => {
                tracing::info!(scheme, "vault created");
                self.set_state(SessionState::Unlocked(active));
                Ok(())
            }
            PublishOutcome::Pending(err) => {
                tracing::warn!(scheme, "vault created, fingerprint not confirmed yet");
                self.set_state(SessionState::Unlocked(active));
                Err(err)
            }
            PublishOutcome::NotLanded(err) => {
                tracing::warn!(category = err.category(), "publish failed, rolling back new vault");
                if let Err(clear_err) = self.store.clear() {
                    tracing::error!(error = %clear_err, "failed to roll back vault slot");
                }
                self.set_state(SessionState::NoVaultFound);
                Err(err)
            }
        }
    }

    /// Unlock the stored vault with `credential`.
    pub fn unlock(&self, credential: Credential) -> Result<(), VaultError> {
        let _flight = self.single_flight();
        self.set_state(SessionState::Unlocking);

        match self.open_stored(credential) {
            Ok(active) => {
                tracing::info!(
                    scheme = active.envelope.scheme(),
                    accounts = active.vault.accounts.len(),
                    "vault unlocked"
                );
                self.set_state(SessionState::Unlocked(active));
                Ok(())
            }
            Err(VaultError::NoVaultFound) => {
                self.set_state(SessionState::NoVaultFound);
                Err(VaultError::NoVaultFound)
            }
            Err(err) => {
                tracing::warn!(category = err.category(), "unlock failed");
                self.set_state(SessionState::LockFailed);
                Err(err)
            }
        }
    }

    fn open_stored(&self, credential: Credential) -> Result<ActiveVault, VaultError> {
        let envelope = self.store.load()?.ok_or(VaultError::NoVaultFound)?;

        if let EncryptedEnvelope::LegacyOpaque(env) = &envelope {
            return Err(CipherError::UnsupportedEnvelope(format!(
                "version {} passphrase-cipher envelope; re-create the vault",
                env.version
            ))
            .into());
        }

        let key = self.key_for_envelope(credential, &envelope)?;
        let vault = crypto::decrypt(&envelope, &key)?;

        let identity = match &self.oracle {
            Some(oracle) => {
                let address = oracle.identity()?;
                if !oracle.verify(&envelope, &address)? {
                    return Err(VaultError::IntegrityViolation);
                }
                Some(address)
            }
            None => None,
        };

        Ok(ActiveVault {
            vault,
            key: Arc::new(key),
            envelope,
            identity,
        })
    }

    /// Apply `edit` to a copy of the vault, then encrypt, persist and publish.
    ///
    /// The session's vault only changes once the publish has landed. When it
    /// certainly did not, the previous envelope is written back to the slot.
    /// A `PublishUnconfirmed` write is kept and adopted, since it may still
    /// land. The state lock is not held during I/O, so `status` and reads
    /// stay available while a ledger write is confirming.
    pub fn mutate<F>(&self, edit: F) -> Result<(), VaultError>
    where
        F: FnOnce(&mut Vault) -> Result<(), VaultError>,
    {
        let _flight = self.single_flight();
        let (base, key, previous, identity) = match &*self.state() {
            SessionState::Unlocked(active) => (
                active.vault.clone(),
                Arc::clone(&active.key),
                active.envelope.clone(),
                active.identity,
            ),
            _ => return Err(VaultError::NotUnlocked),
        };

        let mut draft = base.clone();
        edit(&mut draft)?;
        draft.validate_changes(&base)?;

        let envelope = crypto::encrypt(&draft, &key)?;
        self.store.save(&envelope)?;

        match self.publish(&envelope, identity) {
            PublishOutcome::Landed => {
                tracing::info!(accounts = draft.accounts.len(), "vault saved");
                self.adopt(draft, envelope);
                Ok(())
            }
            PublishOutcome::Pending(err) => {
                tracing::warn!(accounts = draft.accounts.len(), "vault saved, fingerprint not confirmed yet");
                self.adopt(draft, envelope);
                Err(err)
            }
            PublishOutcome::NotLanded(err) => {
                tracing::warn!(category = err.category(), "publish failed, restoring previous envelope");
                if let Err(restore_err) = self.store.save(&previous) {
                    tracing::error!(error = %restore_err, "failed to restore previous envelope");
                }
                Err(err)
            }
        }
    }

    /// Make `vault`/`envelope` the unlocked contents. Callers hold the
    /// single-flight guard, so the session is still the one they snapshotted.
    fn adopt(&self, vault: Vault, envelope: EncryptedEnvelope) {
        if let SessionState::Unlocked(active) = &mut *self.state() {
            active.vault = vault;
            active.envelope = envelope;
        }
    }

    /// Publish `envelope` and classify the result. An unclear failure is
    /// settled by reading the ledger back.
    fn publish(&self, envelope: &EncryptedEnvelope, identity: Option<Address>) -> PublishOutcome {
        let (Some(oracle), Some(address)) = (&self.oracle, identity) else {
            return PublishOutcome::Landed;
        };
        let err = match oracle.publish(envelope, &address) {
            Ok(_) => return PublishOutcome::Landed,
            Err(err @ (VaultError::LedgerUnavailable(_) | VaultError::PublishUnconfirmed(_))) => err,
            Err(err) => return PublishOutcome::NotLanded(err),
        };
        match oracle.verify(envelope, &address) {
            Ok(true) => {
                tracing::info!(category = err.category(), "ledger holds the new fingerprint despite the error");
                PublishOutcome::Landed
            }
            _ if matches!(err, VaultError::PublishUnconfirmed(_)) => PublishOutcome::Pending(err),
            _ => PublishOutcome::NotLanded(err),
        }
    }

    /// Whether the ledger now holds the fingerprint of the unlocked vault's
    /// envelope. Used to settle a `PublishUnconfirmed` write.
    pub fn confirm_published(&self) -> Result<bool, VaultError> {
        let _flight = self.single_flight();
        let (envelope, identity) = match &*self.state() {
            SessionState::Unlocked(active) => (active.envelope.clone(), active.identity),
            _ => return Err(VaultError::NotUnlocked),
        };
        match (&self.oracle, identity) {
            (Some(oracle), Some(address)) => oracle.verify(&envelope, &address),
            _ => Ok(true),
        }
    }

    /// Discard the plaintext vault and key. Locking twice is a no-op.
    pub fn lock(&self) {
        let _flight = self.single_flight();
        let mut state = self.state();
        match state.status() {
            SessionStatus::Unlocked => {
                *state = SessionState::Locked;
                tracing::info!("vault locked");
            }
            SessionStatus::VaultLocked | SessionStatus::LockFailed => {
                *state = SessionState::Locked;
            }
            _ => {}
        }
    }

    /// Run `read` against the unlocked vault without copying it out.
    pub fn with_vault<R>(&self, read: impl FnOnce(&Vault) -> R) -> Result<R, VaultError> {
        match &*self.state() {
            SessionState::Unlocked(active) => Ok(read(&active.vault)),
            _ => Err(VaultError::NotUnlocked),
        }
    }

    /// Copy of the unlocked vault.
    pub fn vault(&self) -> Result<Vault, VaultError> {
        self.with_vault(Vault::clone)
    }

    /// Envelope the unlocked vault was last saved as.
    pub fn envelope(&self) -> Result<EncryptedEnvelope, VaultError> {
        match &*self.state() {
            SessionState::Unlocked(active) => Ok(active.envelope.clone()),
            _ => Err(VaultError::NotUnlocked),
        }
    }

    fn wallet(&self) -> Result<&Arc<dyn IdentityProvider>, VaultError> {
        self.identity
            .as_ref()
            .ok_or_else(|| VaultError::LedgerUnavailable("no wallet configured".into()))
    }

    fn sign_for_key(&self, challenge: Option<String>) -> Result<VaultKey, VaultError> {
        let wallet = self.wallet()?;
        let address = wallet.primary_account()?;
        let signature = wallet.sign_message(&address, &unlock_message(challenge.as_deref()))?;
        Ok(VaultKey::from_signature(&signature, challenge)?)
    }

    fn key_for_new_vault(&self, credential: Credential) -> Result<VaultKey, VaultError> {
        match credential {
            Credential::Password(password) => Ok(VaultKey::password(&password)?),
            Credential::Wallet => {
                let challenge = self.bind_vault_nonce.then(|| {
                    let mut nonce = [0u8; CHALLENGE_LEN];
                    OsRng.fill_bytes(&mut nonce);
                    hex::encode(nonce)
                });
                self.sign_for_key(challenge)
            }
        }
    }

    fn key_for_envelope(
        &self,
        credential: Credential,
        envelope: &EncryptedEnvelope,
    ) -> Result<VaultKey, VaultError> {
        match credential {
            Credential::Password(password) => Ok(VaultKey::password(&password)?),
            Credential::Wallet => self.sign_for_key(envelope.challenge().map(str::to_string)),
        }
    }
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession")
            .field("status", &self.status())
            .field("oracle", &self.oracle)
            .finish()
    }
}
