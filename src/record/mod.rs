/// Record module: plaintext vault model, encrypted envelope shapes, and the
/// canonical JSON form used to fingerprint an envelope.
///
/// The envelope is the only thing ever persisted or hashed. Its canonical form is
/// compact serde_json output with fields in declaration order. Do NOT enable the
/// `preserve_order` serde_json feature and do NOT reorder fields below: the
/// fingerprint of every envelope already anchored on the ledger depends on it.
use std::time::SystemTime;

use alloy_primitives::{keccak256, B256};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::CipherError;
use crate::error::VaultError;

/// 32-byte integrity fingerprint of an envelope, as stored by the ledger.
pub type Digest = B256;

/// One saved site credential.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Account {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub site: String,
    #[serde(default)]
    pub username: String,
    pub password: String,
}

impl Account {
    pub fn new(site: &str, username: &str, password: &str) -> Self {
        Account {
            id: None,
            site: site.trim().to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn validate(&self) -> Result<(), VaultError> {
        if self.site.trim().is_empty() {
            return Err(VaultError::InvalidAccount("site is required".into()));
        }
        if self.password.is_empty() {
            return Err(VaultError::InvalidAccount("password is required".into()));
        }
        Ok(())
    }
}

/// The plaintext vault document. Only ever lives in memory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Vault {
    pub accounts: Vec<Account>,
}

/// Older writers stored a bare array of accounts; both decode to `Vault`.
#[derive(Deserialize)]
#[serde(untagged)]
enum VaultRepr {
    Document { accounts: Vec<Account> },
    Bare(Vec<Account>),
}

impl Vault {
    /// Decode decrypted plaintext, normalizing the bare-array shape.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let accounts = match serde_json::from_slice::<VaultRepr>(bytes)? {
            VaultRepr::Document { accounts } => accounts,
            VaultRepr::Bare(accounts) => accounts,
        };
        Ok(Vault { accounts })
    }

    /// Check the persistence invariants on every account.
    pub fn validate(&self) -> Result<(), VaultError> {
        self.accounts
            .iter()
            .enumerate()
            .try_for_each(|(index, account)| validate_at(index, account))
    }

    /// Like `validate`, but skips accounts that are unchanged from `previous`.
    /// Older vaults may already hold an account without a password; editing
    /// other entries must still work.
    pub fn validate_changes(&self, previous: &Vault) -> Result<(), VaultError> {
        self.accounts
            .iter()
            .enumerate()
            .filter(|(_, account)| !previous.accounts.contains(account))
            .try_for_each(|(index, account)| validate_at(index, account))
    }

    /// Append an account, assigning it a fresh id. Returns the id.
    pub fn add_account(&mut self, mut account: Account) -> Result<String, VaultError> {
        account.validate()?;
        let id = new_account_id();
        account.id = Some(id.clone());
        self.accounts.push(account);
        Ok(id)
    }

    /// Replace the account with the given id, keeping the id.
    pub fn update_account(&mut self, id: &str, mut account: Account) -> Result<(), VaultError> {
        account.validate()?;
        let slot = self
            .accounts
            .iter_mut()
            .find(|a| a.id.as_deref() == Some(id))
            .ok_or_else(|| VaultError::InvalidAccount(format!("no account with id {}", id)))?;
        account.id = Some(id.to_string());
        *slot = account;
        Ok(())
    }

    /// Remove accounts by id, or by exact (case-insensitive) site when no id matches.
    /// Returns how many were removed.
    pub fn remove_account(&mut self, id_or_site: &str) -> usize {
        let before = self.accounts.len();
        if self.accounts.iter().any(|a| a.id.as_deref() == Some(id_or_site)) {
            self.accounts.retain(|a| a.id.as_deref() != Some(id_or_site));
        } else {
            self.accounts
                .retain(|a| !a.site.eq_ignore_ascii_case(id_or_site.trim()));
        }
        before - self.accounts.len()
    }

    /// First account whose site matches `host` (see `util::site_matches`).
    pub fn find_for_site(&self, host: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| crate::util::site_matches(&a.site, host))
    }
}

fn validate_at(index: usize, account: &Account) -> Result<(), VaultError> {
    account.validate().map_err(|err| match err {
        VaultError::InvalidAccount(reason) => VaultError::InvalidAccount(format!(
            "account #{} ({}): {}",
            index,
            account.id.as_deref().unwrap_or("no id"),
            reason
        )),
        other => other,
    })
}

/// Creation-time-derived unique token: millisecond timestamp plus 32 random bits.
fn new_account_id() -> String {
    let millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", millis, suffix)
}

// ── Envelope shapes ─────────────────────────────────────────────────────────

/// Password-scheme envelope: PBKDF2 salt and AES-GCM nonce travel with the ciphertext.
///
/// Field order (ciphertext, iv, salt) matches what the browser extension hashed,
/// so untagged envelopes written by it keep their on-chain fingerprint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PasswordEnvelope {
    /// Base64 AES-256-GCM ciphertext with the 16-byte tag appended.
    pub ciphertext: String,
    pub iv: [u8; 12],
    pub salt: [u8; 16],
}

/// Signature-scheme envelope: the key comes from a wallet signature, so no salt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignatureEnvelope {
    pub ciphertext: String,
    pub iv: [u8; 12],
    pub version: u32,
    /// Hex nonce mixed into the signed unlock message. Absent on vaults that
    /// sign the bare fixed message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
}

/// Opaque ciphertext from the old passphrase stream-cipher library.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpaqueEnvelope {
    pub ciphertext: String,
    pub version: u32,
}

/// Envelopes written by this crate. The `scheme` tag is serialized first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum TaggedEnvelope {
    Password(PasswordEnvelope),
    Signature(SignatureEnvelope),
}

/// Everything that may sit in the vault slot.
///
/// Untagged shapes are only ever read, never written: the next save re-encrypts
/// into a `Tagged` envelope.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum EncryptedEnvelope {
    Tagged(TaggedEnvelope),
    LegacyPassword(PasswordEnvelope),
    LegacyOpaque(OpaqueEnvelope),
}

impl EncryptedEnvelope {
    /// Classify a stored JSON value. Tagged envelopes are required to carry a
    /// known `scheme`; untagged ones are matched against the two legacy shapes.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CipherError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CipherError::MalformedEnvelope("envelope is not an object".into()))?;

        if obj.contains_key("scheme") {
            let tagged = serde_json::from_value::<TaggedEnvelope>(value)
                .map_err(|e| CipherError::MalformedEnvelope(e.to_string()))?;
            return Ok(EncryptedEnvelope::Tagged(tagged));
        }

        if obj.contains_key("salt") && obj.contains_key("iv") {
            let env = serde_json::from_value::<PasswordEnvelope>(value)
                .map_err(|e| CipherError::MalformedEnvelope(e.to_string()))?;
            return Ok(EncryptedEnvelope::LegacyPassword(env));
        }

        if obj.contains_key("version") {
            let env = serde_json::from_value::<OpaqueEnvelope>(value)
                .map_err(|e| CipherError::MalformedEnvelope(e.to_string()))?;
            return Ok(EncryptedEnvelope::LegacyOpaque(env));
        }

        Err(CipherError::MalformedEnvelope(
            "unrecognized envelope shape".into(),
        ))
    }

    pub fn from_json(json: &str) -> Result<Self, CipherError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| CipherError::MalformedEnvelope(e.to_string()))?;
        Self::from_value(value)
    }

    /// Short scheme label for logs and status output.
    pub fn scheme(&self) -> &'static str {
        match self {
            EncryptedEnvelope::Tagged(TaggedEnvelope::Password(_)) => "password",
            EncryptedEnvelope::Tagged(TaggedEnvelope::Signature(_)) => "signature",
            EncryptedEnvelope::LegacyPassword(_) => "legacy-password",
            EncryptedEnvelope::LegacyOpaque(_) => "legacy-opaque",
        }
    }

    /// Signing nonce for signature-scheme envelopes.
    pub fn challenge(&self) -> Option<&str> {
        match self {
            EncryptedEnvelope::Tagged(TaggedEnvelope::Signature(env)) => env.challenge.as_deref(),
            _ => None,
        }
    }

    pub fn is_signature_scheme(&self) -> bool {
        matches!(
            self,
            EncryptedEnvelope::Tagged(TaggedEnvelope::Signature(_))
                | EncryptedEnvelope::LegacyOpaque(_)
        )
    }
}

impl<'de> Deserialize<'de> for EncryptedEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        EncryptedEnvelope::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Produce canonical JSON: compact (no whitespace), fields in declaration order.
pub fn canonical_json(envelope: &EncryptedEnvelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Keccak-256 of the canonical JSON bytes.
pub fn fingerprint(envelope: &EncryptedEnvelope) -> Result<Digest, serde_json::Error> {
    let json = canonical_json(envelope)?;
    Ok(keccak256(json.as_bytes()))
}

/// First 8 hex characters of a digest, for display.
pub fn short_fingerprint(digest: &Digest) -> String {
    hex::encode(&digest.as_slice()[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_password_envelope() -> PasswordEnvelope {
        PasswordEnvelope {
            ciphertext: "c2VjcmV0LWJsb2I=".to_string(),
            iv: [7u8; 12],
            salt: [9u8; 16],
        }
    }

    #[test]
    fn test_tagged_envelope_serializes_scheme_first() {
        let env = EncryptedEnvelope::Tagged(TaggedEnvelope::Password(sample_password_envelope()));
        let json = canonical_json(&env).expect("canonical_json should succeed");

        let scheme_pos = json.find("\"scheme\"").expect("scheme key missing");
        let ct_pos = json.find("\"ciphertext\"").expect("ciphertext key missing");
        let iv_pos = json.find("\"iv\"").expect("iv key missing");
        let salt_pos = json.find("\"salt\"").expect("salt key missing");

        assert!(scheme_pos < ct_pos, "scheme must come before ciphertext");
        assert!(ct_pos < iv_pos, "ciphertext must come before iv");
        assert!(iv_pos < salt_pos, "iv must come before salt");
        assert!(json.contains("\"scheme\":\"password\""), "got: {}", json);
    }

    #[test]
    fn test_legacy_password_envelope_canonical_form_is_untagged() {
        let env = EncryptedEnvelope::LegacyPassword(sample_password_envelope());
        let json = canonical_json(&env).expect("canonical_json should succeed");
        assert!(
            json.starts_with("{\"ciphertext\":\"c2VjcmV0LWJsb2I=\",\"iv\":[7,7,"),
            "legacy form must be exactly ciphertext, iv, salt with byte arrays, got: {}",
            json
        );
        assert!(!json.contains("scheme"), "legacy form must not gain a tag");
    }

    #[test]
    fn test_canonical_json_is_compact_no_whitespace() {
        let env = EncryptedEnvelope::Tagged(TaggedEnvelope::Password(sample_password_envelope()));
        let json = canonical_json(&env).expect("canonical_json should succeed");
        assert!(!json.contains('\n'), "canonical JSON must not contain newlines");
        assert!(!json.contains(": "), "canonical JSON must not have space after colon");
        assert!(!json.contains(", "), "canonical JSON must not have space after comma");
    }

    #[test]
    fn test_parse_legacy_extension_envelope() {
        let iv: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        let salt: Vec<String> = (0..16).map(|i| i.to_string()).collect();
        let json = format!(
            "{{\"ciphertext\":\"AAAA\",\"iv\":[{}],\"salt\":[{}]}}",
            iv.join(","),
            salt.join(",")
        );
        let env = EncryptedEnvelope::from_json(&json).expect("legacy shape must parse");
        assert_eq!(env.scheme(), "legacy-password");
        assert_eq!(
            canonical_json(&env).expect("canonical_json should succeed"),
            json,
            "legacy envelope must re-serialize byte-for-byte"
        );
    }

    #[test]
    fn test_parse_legacy_opaque_envelope() {
        let env = EncryptedEnvelope::from_json("{\"ciphertext\":\"U2FsdGVkX1+abc\",\"version\":1}")
            .expect("opaque shape must parse");
        assert_eq!(env.scheme(), "legacy-opaque");
    }

    #[test]
    fn test_parse_rejects_unknown_scheme_and_shapes() {
        assert!(EncryptedEnvelope::from_json("{\"scheme\":\"rot13\",\"ciphertext\":\"x\"}").is_err());
        assert!(EncryptedEnvelope::from_json("{\"ciphertext\":\"x\"}").is_err());
        assert!(EncryptedEnvelope::from_json("[1,2,3]").is_err());
        assert!(
            EncryptedEnvelope::from_json("{\"ciphertext\":\"x\",\"iv\":[1,2],\"salt\":[3]}").is_err(),
            "short iv/salt arrays must be rejected"
        );
    }

    #[test]
    fn test_signature_envelope_round_trips_through_serde() {
        let env = EncryptedEnvelope::Tagged(TaggedEnvelope::Signature(SignatureEnvelope {
            ciphertext: "Zm9v".to_string(),
            iv: [1u8; 12],
            version: 1,
            challenge: Some("abcd".to_string()),
        }));
        let json = serde_json::to_string(&env).expect("serialize should succeed");
        let back: EncryptedEnvelope = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, env);
        assert_eq!(back.challenge(), Some("abcd"));
    }

    #[test]
    fn test_fingerprint_deterministic_and_sensitive() {
        let env = EncryptedEnvelope::Tagged(TaggedEnvelope::Password(sample_password_envelope()));
        let a = fingerprint(&env).expect("fingerprint should succeed");
        let b = fingerprint(&env).expect("fingerprint should succeed");
        assert_eq!(a, b, "fingerprint must be stable for an unchanged envelope");

        let mut changed = sample_password_envelope();
        changed.iv[0] ^= 1;
        let c = fingerprint(&EncryptedEnvelope::Tagged(TaggedEnvelope::Password(changed)))
            .expect("fingerprint should succeed");
        assert_ne!(a, c, "changing one byte must change the fingerprint");
    }

    #[test]
    fn test_fingerprint_is_keccak_of_canonical_json() {
        let env = EncryptedEnvelope::LegacyPassword(sample_password_envelope());
        let json = canonical_json(&env).expect("canonical_json should succeed");
        assert_eq!(
            fingerprint(&env).expect("fingerprint should succeed"),
            keccak256(json.as_bytes())
        );
    }

    #[test]
    fn test_vault_accepts_bare_array_shape() {
        let vault = Vault::from_json_bytes(
            br#"[{"site":"netflix","username":"bob","password":"pw"}]"#,
        )
        .expect("bare array must decode");
        assert_eq!(vault.accounts.len(), 1);
        assert_eq!(vault.accounts[0].site, "netflix");
    }

    #[test]
    fn test_empty_vault_serializes_with_accounts_field() {
        let json = serde_json::to_string(&Vault::default()).expect("serialize should succeed");
        assert_eq!(json, "{\"accounts\":[]}");
    }

    #[test]
    fn test_add_account_rejects_missing_site_or_password() {
        let mut vault = Vault::default();
        assert!(vault.add_account(Account::new("  ", "alice", "pw")).is_err());
        assert!(vault.add_account(Account::new("github.com", "alice", "")).is_err());
        assert!(vault.accounts.is_empty(), "rejected accounts must not be stored");
    }

    #[test]
    fn test_add_account_assigns_unique_ids() {
        let mut vault = Vault::default();
        let a = vault
            .add_account(Account::new("github.com", "alice", "pw1"))
            .expect("add should succeed");
        let b = vault
            .add_account(Account::new("gitlab.com", "alice", "pw2"))
            .expect("add should succeed");
        assert_ne!(a, b, "ids must be unique");
        assert_eq!(vault.accounts[0].id.as_deref(), Some(a.as_str()));
    }

    #[test]
    fn test_update_and_remove_account() {
        let mut vault = Vault::default();
        let id = vault
            .add_account(Account::new("github.com", "alice", "old"))
            .expect("add should succeed");
        vault
            .update_account(&id, Account::new("github.com", "alice", "new"))
            .expect("update should succeed");
        assert_eq!(vault.accounts[0].password, "new");
        assert_eq!(vault.accounts[0].id.as_deref(), Some(id.as_str()));

        assert_eq!(vault.remove_account("GITHUB.COM"), 1, "remove by site is case-insensitive");
        assert!(vault.accounts.is_empty());
        assert!(vault.update_account(&id, Account::new("x", "y", "z")).is_err());
    }

    #[test]
    fn test_validate_names_the_offending_account() {
        let vault = Vault::from_json_bytes(
            br#"{"accounts":[{"id":"a1","site":"ok.example","password":"pw"},{"id":"b2","site":"broken.example","password":""}]}"#,
        )
        .expect("decode");
        let err = vault.validate().expect_err("empty password must fail");
        let VaultError::InvalidAccount(msg) = err else {
            panic!("expected InvalidAccount, got {:?}", err);
        };
        assert!(msg.contains("#1") && msg.contains("b2"), "message must point at the account: {}", msg);
    }

    #[test]
    fn test_validate_changes_ignores_untouched_legacy_accounts() {
        let previous = Vault::from_json_bytes(
            br#"[{"id":"old","site":"legacy.example","password":""}]"#,
        )
        .expect("decode");

        let mut edited = previous.clone();
        edited
            .add_account(Account::new("new.example", "bob", "pw"))
            .expect("add should succeed");
        edited
            .validate_changes(&previous)
            .expect("an untouched invalid account must not block other edits");

        let mut broken = edited.clone();
        broken.accounts[1].password.clear();
        assert!(
            matches!(broken.validate_changes(&previous), Err(VaultError::InvalidAccount(_))),
            "a changed account must still be validated"
        );
    }

    #[test]
    fn test_find_for_site_uses_substring_match() {
        let mut vault = Vault::default();
        vault
            .add_account(Account::new("netflix", "bob", "pw"))
            .expect("add should succeed");
        let found = vault.find_for_site("www.Netflix.com").expect("should match");
        assert_eq!(found.username, "bob");
        assert!(vault.find_for_site("example.org").is_none());
    }

    #[test]
    fn test_short_fingerprint_is_eight_hex_chars() {
        let digest = keccak256(b"guardium");
        let short = short_fingerprint(&digest);
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
