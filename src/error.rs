use thiserror::Error;

use crate::crypto::CipherError;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Secret is empty or malformed")]
    InvalidSecret,

    #[error("No vault found. Run `guardium init` first.")]
    NoVaultFound,

    #[error("A vault already exists in this slot")]
    VaultAlreadyExists,

    #[error("Wrong master password or wallet signature")]
    WrongSecret(#[source] CipherError),

    #[error("Stored vault envelope is unreadable")]
    CorruptEnvelope(#[source] CipherError),

    #[error("Vault fingerprint does not match the ledger record")]
    IntegrityViolation,

    #[error("Ledger or wallet unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger rejected the update: {0}")]
    LedgerRejected(String),

    /// Submitted to the ledger, but not confirmed in time. It may still land.
    #[error("Ledger update submitted but not confirmed: {0}")]
    PublishUnconfirmed(String),

    #[error("Request was rejected in the wallet")]
    UserRejected,

    #[error("Vault storage failed")]
    StorageFailure(#[source] std::io::Error),

    #[error("Vault is locked")]
    NotUnlocked,

    #[error("Invalid account: {0}")]
    InvalidAccount(String),
}

impl VaultError {
    /// Stable per-variant label for logs and user-facing message selection.
    pub fn category(&self) -> &'static str {
        match self {
            VaultError::InvalidSecret => "invalid_secret",
            VaultError::NoVaultFound => "no_vault_found",
            VaultError::VaultAlreadyExists => "vault_already_exists",
            VaultError::WrongSecret(_) => "wrong_secret",
            VaultError::CorruptEnvelope(_) => "corrupt_envelope",
            VaultError::IntegrityViolation => "integrity_violation",
            VaultError::LedgerUnavailable(_) => "ledger_unavailable",
            VaultError::LedgerRejected(_) => "ledger_rejected",
            VaultError::PublishUnconfirmed(_) => "publish_unconfirmed",
            VaultError::UserRejected => "user_rejected",
            VaultError::StorageFailure(_) => "storage_failure",
            VaultError::NotUnlocked => "not_unlocked",
            VaultError::InvalidAccount(_) => "invalid_account",
        }
    }

    /// True for failures the caller may retry without new input.
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::LedgerUnavailable(_))
    }
}

impl From<CipherError> for VaultError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::InvalidSecret => VaultError::InvalidSecret,
            CipherError::AuthenticationFailed | CipherError::SchemeMismatch => {
                VaultError::WrongSecret(err)
            }
            other => VaultError::CorruptEnvelope(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_authentication_failure_maps_to_wrong_secret_with_source() {
        let err = VaultError::from(CipherError::AuthenticationFailed);
        assert!(matches!(err, VaultError::WrongSecret(_)));
        let source = err
            .source()
            .and_then(|s| s.downcast_ref::<CipherError>())
            .expect("WrongSecret must carry the cipher error as source");
        assert!(matches!(source, CipherError::AuthenticationFailed));
    }

    #[test]
    fn test_malformed_envelope_is_not_a_wrong_secret() {
        let err = VaultError::from(CipherError::MalformedEnvelope("iv".into()));
        assert!(
            matches!(err, VaultError::CorruptEnvelope(_)),
            "a broken envelope must not be reported as a wrong password"
        );
    }

    #[test]
    fn test_wrong_secret_and_integrity_violation_have_distinct_categories() {
        let wrong = VaultError::from(CipherError::AuthenticationFailed);
        assert_ne!(wrong.category(), VaultError::IntegrityViolation.category());
    }

    #[test]
    fn test_only_ledger_unavailable_is_transient() {
        assert!(VaultError::LedgerUnavailable("timeout".into()).is_transient());
        assert!(!VaultError::IntegrityViolation.is_transient());
        assert!(!VaultError::UserRejected.is_transient());
        assert!(!VaultError::LedgerRejected("reverted".into()).is_transient());
        assert!(!VaultError::PublishUnconfirmed("0xabc".into()).is_transient());
    }
}
