/// Plaintext leak detection tests.
///
/// Verify that envelopes, the stored slot and the ledger record never contain
/// a saved site, username or password in any readable form: neither as raw
/// text nor base64-encoded.
///
/// These tests guard against a refactor that accidentally stores plaintext
/// vault data next to the ciphertext.
use std::sync::Arc;

use alloy_primitives::Address;
use base64::Engine;

use guardium::crypto::{encrypt, VaultKey};
use guardium::identity::{IdentityProvider, StaticIdentity};
use guardium::ledger::{digest_hex, FileLedger, IntegrityOracle};
use guardium::record::{canonical_json, Account, Vault};
use guardium::session::{Credential, VaultSession};
use guardium::store::FileStore;

const KNOWN_SITE: &str = "KNOWN-SITE-abc123-MUST-NOT-APPEAR.example";
const KNOWN_USER: &str = "known-user-must-not-appear";
const KNOWN_PASSWORD: &str = "KNOWN-PASSWORD-xyz789-MUST-NOT-APPEAR";

fn secret_vault() -> Vault {
    let mut vault = Vault::default();
    vault
        .add_account(Account::new(KNOWN_SITE, KNOWN_USER, KNOWN_PASSWORD))
        .expect("add should succeed");
    vault
}

/// Assert that `haystack` carries none of the known plaintext values.
fn assert_no_plaintext(haystack: &str, what: &str) {
    let b64 = base64::engine::general_purpose::STANDARD;
    for needle in [KNOWN_SITE, KNOWN_USER, KNOWN_PASSWORD] {
        assert!(
            !haystack.contains(needle),
            "{} must not contain plaintext {:?}",
            what,
            needle
        );
        assert!(
            !haystack.contains(&b64.encode(needle)),
            "{} must not contain base64 of {:?}",
            what,
            needle
        );
    }
}

// ── Test 1: Password envelope contains no plaintext ─────────────────────────

#[test]
fn test_password_envelope_contains_no_plaintext() {
    let key = VaultKey::password("correct-horse-battery").expect("key");
    let envelope = encrypt(&secret_vault(), &key).expect("encrypt should succeed");
    let json = canonical_json(&envelope).expect("canonical_json should succeed");
    assert_no_plaintext(&json, "password envelope");
    assert!(
        !json.contains("correct-horse-battery"),
        "envelope must not contain the master password"
    );
}

// ── Test 2: Signature envelope contains no plaintext or signature ───────────

#[test]
fn test_signature_envelope_contains_no_plaintext_or_signature() {
    let signature = "0xfeedfacecafebeef0011223344556677";
    let key = VaultKey::from_signature(signature, Some("00ff".into())).expect("key");
    let envelope = encrypt(&secret_vault(), &key).expect("encrypt should succeed");
    let json = canonical_json(&envelope).expect("canonical_json should succeed");
    assert_no_plaintext(&json, "signature envelope");
    assert!(!json.contains(&signature[2..]), "envelope must not contain the signature");
}

// ── Test 3: Slot file and ledger file after a real session ──────────────────

#[test]
fn test_slot_and_ledger_files_contain_no_plaintext() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = Arc::new(FileStore::in_dir(dir.path()));
    let ledger_path = dir.path().join("ledger.json");
    let identity: Arc<dyn IdentityProvider> =
        Arc::new(StaticIdentity::new(Address::repeat_byte(0x5A)));
    let session = VaultSession::new(store.clone()).with_oracle(IntegrityOracle::new(
        Arc::new(FileLedger::new(ledger_path.clone())),
        identity,
    ));

    session
        .create(Credential::password("correct-horse-battery"))
        .expect("create should succeed");
    session
        .mutate(|vault| {
            vault
                .add_account(Account::new(KNOWN_SITE, KNOWN_USER, KNOWN_PASSWORD))
                .map(|_| ())
        })
        .expect("mutate should succeed");
    let envelope = session.envelope().expect("envelope");
    session.lock();

    let slot = std::fs::read_to_string(store.path()).expect("slot should exist");
    assert_no_plaintext(&slot, "slot file");

    let ledger = std::fs::read_to_string(&ledger_path).expect("ledger should exist");
    assert_no_plaintext(&ledger, "ledger file");
    let digest = IntegrityOracle::fingerprint(&envelope).expect("fingerprint");
    assert!(
        ledger.contains(&digest_hex(&digest)),
        "ledger must hold only the fingerprint of the stored envelope"
    );
}
