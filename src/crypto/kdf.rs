//! Key derivation: master password or wallet signature -> 256-bit AES key.
//!
//! Two strategies coexist:
//!   - password: PBKDF2-HMAC-SHA256, 200,000 iterations, fresh 16-byte salt per encryption
//!   - signature: SHA-256 over the signature string, no salt (see `unlock_message`)
//!
//! Both are pure functions of their inputs. Derived keys are wrapped in `Zeroizing`
//! and never serialized, logged, or sent anywhere.

use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::CipherError;

/// PBKDF2 iteration count. Implicit in every password envelope; never change it.
pub const PBKDF2_ITERATIONS: u32 = 200_000;

pub const SALT_LEN: usize = 16;

/// Fixed text signed by the wallet to produce key material.
pub const UNLOCK_MESSAGE: &str = "Unlock Guardian Vault v1";

/// Ephemeral symmetric key, zeroed on drop. Not `Clone`.
pub struct DerivedKey(Zeroizing<[u8; 32]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        DerivedKey(Zeroizing::new(bytes))
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Stretch a master password into an AES-256 key with the given salt.
pub fn derive_password_key(password: &str, salt: &[u8; SALT_LEN]) -> Result<DerivedKey, CipherError> {
    if password.is_empty() {
        return Err(CipherError::InvalidSecret);
    }
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
    Ok(DerivedKey(key))
}

/// Hash a wallet signature into an AES-256 key.
///
/// The signature is treated as a high-entropy secret. A `0x`-prefixed signature
/// must be valid hex; anything else is hashed as-is.
pub fn derive_signature_key(signature: &str) -> Result<DerivedKey, CipherError> {
    let sig = signature.trim();
    if sig.is_empty() {
        return Err(CipherError::InvalidSecret);
    }
    if let Some(body) = sig.strip_prefix("0x") {
        if body.is_empty() || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CipherError::InvalidSecret);
        }
    }
    let digest = Sha256::digest(sig.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest);
    Ok(DerivedKey(key))
}

/// The exact text the wallet signs for a vault.
///
/// Without a challenge this is the bare `UNLOCK_MESSAGE`, which every
/// pre-existing signature vault depends on. With a per-vault challenge the
/// signature (and therefore the key) is bound to that one vault.
pub fn unlock_message(challenge: Option<&str>) -> String {
    match challenge {
        Some(nonce) => format!("{}\nVault nonce: {}", UNLOCK_MESSAGE, nonce),
        None => UNLOCK_MESSAGE.to_string(),
    }
}
