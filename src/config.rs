//! Configuration: `~/.guardium/config.toml` plus environment overrides.
//!
//! A missing file means defaults. `GUARDIUM_HOME` replaces the data directory
//! and `GUARDIUM_RPC_URL` the JSON-RPC endpoint.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{IdentityProvider, RpcWallet, StaticIdentity};
use crate::ledger::{FileLedger, IntegrityOracle, Ledger, RegistryContract, DEFAULT_REGISTRY};
use crate::session::VaultSession;
use crate::store::{FileStore, VAULT_SLOT};
use crate::transport::{RpcClient, RpcError};

pub const CONFIG_FILE: &str = "config.toml";
pub const LEDGER_FILE: &str = "ledger.json";

pub const ENV_HOME: &str = "GUARDIUM_HOME";
pub const ENV_RPC_URL: &str = "GUARDIUM_RPC_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot find home directory")]
    HomeDirNotFound,

    #[error("Failed to read config {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid address in config: {0}")]
    InvalidAddress(String),

    #[error("identity backend \"static\" requires [identity] address")]
    MissingStaticAddress,

    #[error("Failed to set up JSON-RPC client")]
    Rpc(#[source] RpcError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityBackend {
    Rpc,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Registry,
    File,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub backend: IdentityBackend,
    pub address: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            backend: IdentityBackend::Rpc,
            address: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub registry: String,
    pub confirm_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// File backend location; defaults to `<data_dir>/ledger.json`.
    pub path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Registry,
            registry: DEFAULT_REGISTRY.to_string(),
            confirm_timeout_secs: 120,
            poll_interval_ms: 1500,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub bind_vault_nonce: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            bind_vault_nonce: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub rpc: RpcConfig,
    pub identity: IdentityConfig,
    pub ledger: LedgerConfig,
    pub signature: SignatureConfig,
}

/// `~/.guardium`, or `$GUARDIUM_HOME` when set.
pub fn default_home() -> Result<PathBuf, ConfigError> {
    if let Some(home) = std::env::var_os(ENV_HOME).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".guardium"))
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Load from `path`, or from the default location when `None`, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_home()?.join(CONFIG_FILE),
        };
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Config::default()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(home) = get(ENV_HOME) {
            self.data_dir = Some(PathBuf::from(home));
        }
        if let Some(url) = get(ENV_RPC_URL) {
            self.rpc.url = url;
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_home(),
        }
    }

    pub fn vault_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(VAULT_SLOT))
    }

    pub fn ledger_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.ledger.path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join(LEDGER_FILE)),
        }
    }

    fn rpc_client(&self) -> Result<Arc<RpcClient>, ConfigError> {
        RpcClient::new(&self.rpc.url, Duration::from_secs(self.rpc.timeout_secs))
            .map(Arc::new)
            .map_err(ConfigError::Rpc)
    }

    pub fn identity_provider(&self) -> Result<Arc<dyn IdentityProvider>, ConfigError> {
        match self.identity.backend {
            IdentityBackend::Rpc => Ok(Arc::new(RpcWallet::new(self.rpc_client()?))),
            IdentityBackend::Static => {
                let raw = self
                    .identity
                    .address
                    .as_deref()
                    .ok_or(ConfigError::MissingStaticAddress)?;
                let address = parse_address(raw)?;
                Ok(Arc::new(StaticIdentity::new(address)))
            }
        }
    }

    /// The configured ledger, or `None` when the oracle is disabled.
    pub fn ledger(&self) -> Result<Option<Arc<dyn Ledger>>, ConfigError> {
        let ledger: Arc<dyn Ledger> = match self.ledger.backend {
            LedgerBackend::None => return Ok(None),
            LedgerBackend::File => Arc::new(FileLedger::new(self.ledger_path()?)),
            LedgerBackend::Registry => {
                let registry = parse_address(&self.ledger.registry)?;
                Arc::new(
                    RegistryContract::new(self.rpc_client()?, registry).with_confirmation(
                        Duration::from_secs(self.ledger.confirm_timeout_secs),
                        Duration::from_millis(self.ledger.poll_interval_ms),
                    ),
                )
            }
        };
        Ok(Some(ledger))
    }

    /// Wire a file-backed session with the configured wallet and oracle.
    pub fn build_session(&self) -> Result<VaultSession, ConfigError> {
        let store = Arc::new(FileStore::at(self.vault_path()?));
        let identity = self.identity_provider()?;
        let mut session = VaultSession::new(store)
            .with_identity(identity.clone())
            .with_bind_vault_nonce(self.signature.bind_vault_nonce);
        if let Some(ledger) = self.ledger()? {
            session = session.with_oracle(IntegrityOracle::new(ledger, identity));
        }
        Ok(session)
    }
}

fn parse_address(raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim()).map_err(|_| ConfigError::InvalidAddress(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").expect("empty config must parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.rpc.url, "http://127.0.0.1:8545");
        assert_eq!(config.ledger.backend, LedgerBackend::Registry);
        assert_eq!(config.ledger.registry, DEFAULT_REGISTRY);
        assert!(config.signature.bind_vault_nonce);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            data_dir = "/tmp/guardium-test"

            [identity]
            backend = "static"
            address = "0x21cBB414F4C6B0646040D9Dc2e7D5189aD6dfA15"

            [ledger]
            backend = "file"
            "#,
        )
        .expect("config must parse");
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/guardium-test")));
        assert_eq!(config.identity.backend, IdentityBackend::Static);
        assert_eq!(config.ledger.backend, LedgerBackend::File);
        assert_eq!(config.ledger.confirm_timeout_secs, 120, "unset keys keep defaults");
        assert_eq!(
            config.ledger_path().expect("ledger path"),
            PathBuf::from("/tmp/guardium-test").join(LEDGER_FILE)
        );
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Config::from_toml_str("[ledger]\nbackend = \"carrier-pigeon\"").is_err());
    }

    #[test]
    fn test_env_overrides_apply_and_ignore_empty() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            ENV_HOME => Some("/srv/guardium".to_string()),
            ENV_RPC_URL => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/guardium")));
        assert_eq!(config.rpc.url, RpcConfig::default().url, "blank override is ignored");
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = Config::load(Some(&dir.path().join("absent.toml"))).expect("load");
        assert_eq!(config.ledger, LedgerConfig::default());
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "rpc = 5").expect("write");
        let err = Config::load(Some(&path)).expect_err("bad config must fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn test_static_identity_requires_valid_address() {
        let mut config = Config::default();
        config.identity.backend = IdentityBackend::Static;
        assert!(matches!(
            config.identity_provider(),
            Err(ConfigError::MissingStaticAddress)
        ));
        config.identity.address = Some("0xnot-an-address".into());
        assert!(matches!(
            config.identity_provider(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_build_session_with_file_ledger() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = Config {
            data_dir: Some(dir.path().to_path_buf()),
            identity: IdentityConfig {
                backend: IdentityBackend::Static,
                address: Some(DEFAULT_REGISTRY.to_string()),
            },
            ledger: LedgerConfig {
                backend: LedgerBackend::File,
                ..LedgerConfig::default()
            },
            ..Config::default()
        };
        let session = config.build_session().expect("session should build");
        let oracle = session.oracle().expect("file backend must configure an oracle");
        assert!(oracle.ledger().describe().starts_with("file "));
    }

    #[test]
    fn test_ledger_none_disables_oracle() {
        let mut config = Config::default();
        config.ledger.backend = LedgerBackend::None;
        assert!(config.ledger().expect("ledger").is_none());
    }
}
