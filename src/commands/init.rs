use owo_colors::{OwoColorize, Stream::Stdout};

use guardium::error::VaultError;
use guardium::ledger::IntegrityOracle;
use guardium::record::short_fingerprint;
use guardium::session::SessionStatus;

use super::{save_error, Ctx};

pub fn run_init(ctx: &Ctx) -> anyhow::Result<()> {
    let session = ctx.session()?;
    let vault_path = ctx.config.vault_path()?;

    if session.probe()? == SessionStatus::VaultLocked {
        anyhow::bail!(
            "A vault already exists at {}. Remove it first to start over.",
            vault_path.display()
        );
    }

    let credential = ctx.credential(true)?;
    match session.create(credential) {
        Ok(()) => {}
        Err(VaultError::InvalidSecret) => anyhow::bail!("Master password must not be empty"),
        Err(e) => {
            session.lock();
            return Err(save_error(e));
        }
    }

    let envelope = session.envelope()?;
    let fingerprint = IntegrityOracle::fingerprint(&envelope)?;

    println!("{}", "Vault created.".if_supports_color(Stdout, |t| t.green()));
    println!();
    println!("Scheme:      {}", envelope.scheme());
    println!("Fingerprint: {}", short_fingerprint(&fingerprint));
    println!("Vault file:  {}", vault_path.display());
    match session.oracle() {
        Some(oracle) => println!("Ledger:      {}", oracle.ledger().describe()),
        None => println!(
            "{}",
            "Ledger:      disabled (no integrity check on unlock)"
                .if_supports_color(Stdout, |t| t.yellow())
        ),
    }

    session.lock();
    Ok(())
}
