use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "guardium",
    version,
    about = "Encrypted credential vault with an on-chain integrity fingerprint"
)]
pub struct Cli {
    /// Config file (default: ~/.guardium/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Unlock with a wallet signature instead of the master password
    #[arg(long, global = true)]
    pub wallet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new, empty vault
    Init,
    /// Save credentials for a site
    Add(AddArgs),
    /// List saved accounts
    List,
    /// Look up the account for a site or URL
    Get(GetArgs),
    /// Remove an account by id or site
    Remove(RemoveArgs),
    /// Check the stored vault against its ledger fingerprint
    Verify(VerifyArgs),
    /// Show identity, backends and the local vault fingerprint
    Whoami,
}

#[derive(Parser)]
pub struct AddArgs {
    /// Site or URL the credentials belong to
    #[arg(value_name = "SITE")]
    pub site: String,

    /// Username for the site
    #[arg(long, short = 'u', default_value = "")]
    pub username: String,
}

#[derive(Parser)]
pub struct GetArgs {
    /// Site name or URL to match against saved accounts
    #[arg(value_name = "SITE")]
    pub site: String,

    /// Print the password instead of masking it
    #[arg(long)]
    pub show: bool,
}

#[derive(Parser)]
pub struct RemoveArgs {
    /// Account id, or exact site name
    #[arg(value_name = "ID_OR_SITE")]
    pub target: String,

    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Parser)]
pub struct VerifyArgs {
    /// Retry with backoff while the ledger is unreachable
    #[arg(long)]
    pub retry: bool,
}
