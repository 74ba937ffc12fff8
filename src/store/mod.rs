//! Store module: one well-known slot holding the encrypted envelope.
//!
//! The store never sees keys or plaintext. `FileStore` writes the slot
//! atomically (temp file then rename) with 0600 permissions; `MemoryStore`
//! backs tests and embedders that persist elsewhere.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::crypto::CipherError;
use crate::error::VaultError;
use crate::record::EncryptedEnvelope;

/// File name of the vault slot inside the data directory.
pub const VAULT_SLOT: &str = "guardium_vault_data.json";

/// Persistence boundary over a single slot.
pub trait VaultStore: Send + Sync {
    fn save(&self, envelope: &EncryptedEnvelope) -> Result<(), VaultError>;

    /// `Ok(None)` when the slot is absent, which means no vault was created yet.
    fn load(&self) -> Result<Option<EncryptedEnvelope>, VaultError>;

    /// Remove the slot entirely. Clearing an empty slot is not an error.
    fn clear(&self) -> Result<(), VaultError>;
}

fn parse_slot(raw: &str) -> Result<EncryptedEnvelope, VaultError> {
    EncryptedEnvelope::from_json(raw).map_err(VaultError::CorruptEnvelope)
}

fn encode_slot(envelope: &EncryptedEnvelope) -> Result<String, VaultError> {
    serde_json::to_string(envelope)
        .map_err(|e| VaultError::CorruptEnvelope(CipherError::MalformedEnvelope(e.to_string())))
}

// ── FileStore ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store whose slot lives at `<dir>/guardium_vault_data.json`.
    pub fn in_dir(dir: &Path) -> Self {
        FileStore {
            path: dir.join(VAULT_SLOT),
        }
    }

    pub fn at(path: PathBuf) -> Self {
        FileStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VaultStore for FileStore {
    fn save(&self, envelope: &EncryptedEnvelope) -> Result<(), VaultError> {
        let json = encode_slot(envelope)?;
        write_atomic(&self.path, json.as_bytes()).map_err(VaultError::StorageFailure)?;
        tracing::debug!(path = %self.path.display(), scheme = envelope.scheme(), "vault slot saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<EncryptedEnvelope>, VaultError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VaultError::StorageFailure(e)),
        };
        parse_slot(&raw).map(Some)
    }

    fn clear(&self) -> Result<(), VaultError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "vault slot cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::StorageFailure(e)),
        }
    }
}

/// Write bytes to `dest` atomically and durably, readable by the owner only.
///
/// The temp file sits next to `dest` so the rename never crosses filesystems.
/// It is created 0600 and synced before the rename; a reader sees either the
/// old slot or the new one, never a partial write.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| std::io::Error::other("slot path has no parent directory"))?;
    std::fs::create_dir_all(parent)?;

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| VAULT_SLOT.to_string());
    let tmp = parent.join(format!(".{}.tmp", file_name));

    // A leftover temp file would keep its old mode; start from scratch.
    match std::fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let written = options.open(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| std::fs::rename(&tmp, dest)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    // Persist the rename itself.
    #[cfg(unix)]
    std::fs::File::open(parent)?.sync_all()?;

    Ok(())
}

// ── MemoryStore ────────────────────────────────────────────────────────────

/// In-memory slot. Clones share the same slot, so a test can hold one handle
/// and tamper with what the session reads through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw serialized slot content, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().map(|s| s.clone()).unwrap_or_else(|p| p.into_inner().clone())
    }

    /// Overwrite the raw slot content, bypassing envelope serialization.
    pub fn set_raw(&self, raw: Option<String>) {
        match self.slot.lock() {
            Ok(mut slot) => *slot = raw,
            Err(poisoned) => *poisoned.into_inner() = raw,
        }
    }
}

impl VaultStore for MemoryStore {
    fn save(&self, envelope: &EncryptedEnvelope) -> Result<(), VaultError> {
        let json = encode_slot(envelope)?;
        self.set_raw(Some(json));
        Ok(())
    }

    fn load(&self) -> Result<Option<EncryptedEnvelope>, VaultError> {
        self.raw().as_deref().map(parse_slot).transpose()
    }

    fn clear(&self) -> Result<(), VaultError> {
        self.set_raw(None);
        Ok(())
    }
}
