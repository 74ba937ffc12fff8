//! Crypto module: vault cipher (AES-256-GCM) over keys from `kdf`.
//!
//! `encrypt` serializes the vault to compact JSON and seals it under a fresh
//! 12-byte nonce (and, for the password scheme, a fresh 16-byte PBKDF2 salt), so
//! two encryptions of the same vault never produce the same envelope. `decrypt`
//! reports a failed GCM tag as `AuthenticationFailed` whether the key was wrong
//! or the ciphertext was modified; the two cases are indistinguishable here.

pub mod kdf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::record::{
    EncryptedEnvelope, PasswordEnvelope, SignatureEnvelope, TaggedEnvelope, Vault,
};

pub use kdf::{
    derive_password_key, derive_signature_key, unlock_message, DerivedKey, UNLOCK_MESSAGE,
};

/// Version written into every signature-scheme envelope.
pub const SIGNATURE_ENVELOPE_VERSION: u32 = 1;

pub const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("secret is empty or malformed")]
    InvalidSecret,

    #[error("authentication failed: wrong key or modified ciphertext")]
    AuthenticationFailed,

    #[error("decrypted vault is not valid JSON")]
    DeserializationFailed(#[source] serde_json::Error),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("key type does not match the envelope scheme")]
    SchemeMismatch,

    #[error("unsupported envelope: {0}")]
    UnsupportedEnvelope(String),

    #[error("encryption failed")]
    EncryptionFailed,
}

/// Key material held by an unlocked session.
///
/// The password scheme keeps the password itself because every save draws a
/// fresh salt and re-derives. The signature scheme keeps only the hashed key.
pub enum VaultKey {
    Password(Zeroizing<String>),
    Signature {
        key: DerivedKey,
        challenge: Option<String>,
    },
}

impl VaultKey {
    pub fn password(password: &str) -> Result<Self, CipherError> {
        if password.is_empty() {
            return Err(CipherError::InvalidSecret);
        }
        Ok(VaultKey::Password(Zeroizing::new(password.to_string())))
    }

    pub fn from_signature(signature: &str, challenge: Option<String>) -> Result<Self, CipherError> {
        Ok(VaultKey::Signature {
            key: derive_signature_key(signature)?,
            challenge,
        })
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            VaultKey::Password(_) => "password",
            VaultKey::Signature { .. } => "signature",
        }
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VaultKey({})", self.scheme())
    }
}

/// Seal bytes under a derived key with a fresh random nonce. Returns (nonce, ciphertext||tag).
pub fn seal(plaintext: &[u8], key: &DerivedKey) -> Result<([u8; NONCE_LEN], Vec<u8>), CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CipherError::InvalidSecret)?;
    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)?;
    Ok((iv, ciphertext))
}

/// Open ciphertext sealed by `seal`. Any tag mismatch is `AuthenticationFailed`.
pub fn open(
    iv: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    key: &DerivedKey,
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CipherError::InvalidSecret)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CipherError::AuthenticationFailed)
}

/// Encrypt a vault into a tagged envelope for the key's scheme.
pub fn encrypt(vault: &Vault, key: &VaultKey) -> Result<EncryptedEnvelope, CipherError> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(vault).map_err(|_| CipherError::EncryptionFailed)?,
    );
    let b64 = base64::engine::general_purpose::STANDARD;

    let tagged = match key {
        VaultKey::Password(password) => {
            let mut salt = [0u8; kdf::SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            let derived = derive_password_key(password, &salt)?;
            let (iv, ciphertext) = seal(&plaintext, &derived)?;
            TaggedEnvelope::Password(PasswordEnvelope {
                ciphertext: b64.encode(ciphertext),
                iv,
                salt,
            })
        }
        VaultKey::Signature { key, challenge } => {
            let (iv, ciphertext) = seal(&plaintext, key)?;
            TaggedEnvelope::Signature(SignatureEnvelope {
                ciphertext: b64.encode(ciphertext),
                iv,
                version: SIGNATURE_ENVELOPE_VERSION,
                challenge: challenge.clone(),
            })
        }
    };

    Ok(EncryptedEnvelope::Tagged(tagged))
}

/// Decrypt an envelope, dispatching on its scheme.
pub fn decrypt(envelope: &EncryptedEnvelope, key: &VaultKey) -> Result<Vault, CipherError> {
    let plaintext = match (envelope, key) {
        (
            EncryptedEnvelope::Tagged(TaggedEnvelope::Password(env))
            | EncryptedEnvelope::LegacyPassword(env),
            VaultKey::Password(password),
        ) => {
            let derived = derive_password_key(password, &env.salt)?;
            open(&env.iv, &decode_ciphertext(&env.ciphertext)?, &derived)?
        }
        (
            EncryptedEnvelope::Tagged(TaggedEnvelope::Signature(env)),
            VaultKey::Signature { key, .. },
        ) => {
            if env.version != SIGNATURE_ENVELOPE_VERSION {
                return Err(CipherError::UnsupportedEnvelope(format!(
                    "signature envelope version {}",
                    env.version
                )));
            }
            open(&env.iv, &decode_ciphertext(&env.ciphertext)?, key)?
        }
        (EncryptedEnvelope::LegacyOpaque(env), _) => {
            return Err(CipherError::UnsupportedEnvelope(format!(
                "version {} passphrase-cipher envelope; re-create the vault",
                env.version
            )));
        }
        _ => return Err(CipherError::SchemeMismatch),
    };

    Vault::from_json_bytes(&plaintext).map_err(CipherError::DeserializationFailed)
}

fn decode_ciphertext(ciphertext: &str) -> Result<Vec<u8>, CipherError> {
    base64::engine::general_purpose::STANDARD
        .decode(ciphertext)
        .map_err(|e| CipherError::MalformedEnvelope(format!("ciphertext is not base64: {}", e)))
}
