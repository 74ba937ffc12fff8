pub mod add;
pub mod get;
pub mod init;
pub mod list;
pub mod remove;
pub mod verify;
pub mod whoami;

use std::io::{self, IsTerminal};
use std::path::Path;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stderr};
use zeroize::Zeroizing;

use guardium::config::Config;
use guardium::error::VaultError;
use guardium::session::{Credential, VaultSession};

/// Per-invocation context shared by every command.
pub struct Ctx {
    pub config: Config,
    pub wallet: bool,
}

impl Ctx {
    pub fn load(config_path: Option<&Path>, wallet: bool) -> anyhow::Result<Self> {
        let config = Config::load(config_path).context("Failed to load configuration")?;
        Ok(Self { config, wallet })
    }

    pub fn session(&self) -> anyhow::Result<VaultSession> {
        self.config
            .build_session()
            .context("Failed to set up vault session")
    }

    /// Master password (prompted) or the wallet, depending on `--wallet`.
    pub fn credential(&self, confirm: bool) -> anyhow::Result<Credential> {
        if self.wallet {
            eprintln!("Approve the signature request in your wallet...");
            return Ok(Credential::Wallet);
        }
        Ok(Credential::Password(read_secret("Master password", confirm)?))
    }

    /// Build a session and unlock it with the user's credential.
    pub fn unlock(&self) -> anyhow::Result<VaultSession> {
        let session = self.session()?;
        let credential = self.credential(false)?;
        session.unlock(credential).map_err(unlock_error)?;
        Ok(session)
    }
}

/// Wrong secrets and ledger mismatches read the same to the user; the log
/// keeps the precise category.
pub fn unlock_error(err: VaultError) -> anyhow::Error {
    tracing::debug!(category = err.category(), error = %err, "unlock rejected");
    match err {
        VaultError::WrongSecret(_) | VaultError::IntegrityViolation => anyhow::anyhow!(
            "Unlock failed. Check your master password or wallet and try again."
        ),
        other => anyhow::Error::new(other),
    }
}

/// Yellow when stderr supports colour.
pub fn warning_line(text: &str) -> String {
    text.if_supports_color(Stderr, |t| t.yellow()).to_string()
}

/// Red when stderr supports colour.
pub fn error_line(text: &str) -> String {
    text.if_supports_color(Stderr, |t| t.red()).to_string()
}

/// A save whose ledger update is still pending is kept locally; say so, and
/// point at `guardium verify` to settle it.
pub fn save_error(err: VaultError) -> anyhow::Error {
    if let VaultError::PublishUnconfirmed(_) = &err {
        eprintln!(
            "{}",
            warning_line(
                "Saved locally, but the ledger update is not confirmed yet. Run `guardium verify` to check again."
            )
        );
    }
    anyhow::Error::new(err)
}

/// Read a secret from the terminal, or one line from stdin when piped.
pub fn read_secret(prompt: &str, confirm: bool) -> anyhow::Result<Zeroizing<String>> {
    if io::stdin().is_terminal() {
        let mut input = dialoguer::Password::new().with_prompt(prompt);
        if confirm {
            input = input.with_confirmation("Confirm", "Entries don't match");
        }
        let secret = input
            .interact()
            .map_err(|e| anyhow::anyhow!("{} prompt failed: {}", prompt, e))?;
        return Ok(Zeroizing::new(secret));
    }

    let mut line = Zeroizing::new(String::new());
    io::stdin()
        .read_line(&mut line)
        .with_context(|| format!("Failed to read {} from stdin", prompt.to_lowercase()))?;
    Ok(Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_lines_follow_colour_support() {
        owo_colors::set_override(false);
        assert_eq!(error_line("mismatch"), "mismatch");
        assert_eq!(warning_line("pending"), "pending");

        owo_colors::set_override(true);
        assert!(error_line("mismatch").starts_with("\u{1b}[31m"), "red expected");
        assert!(warning_line("pending").starts_with("\u{1b}[33m"), "yellow expected");
        owo_colors::unset_override();
    }
}
