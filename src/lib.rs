/// guardium library crate: the vault core behind the `guardium` binary.
///
/// All modules are public so that `tests/` integration tests and embedders can
/// drive a `VaultSession` with their own store, wallet and ledger.
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod record;
pub mod session;
pub mod store;
pub mod transport;
pub mod util;
