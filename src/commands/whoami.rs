use guardium::ledger::IntegrityOracle;
use guardium::record::short_fingerprint;

use super::Ctx;

pub fn run_whoami(ctx: &Ctx) -> anyhow::Result<()> {
    let config = &ctx.config;
    let session = ctx.session()?;

    let identity = match config.identity_provider()?.primary_account() {
        Ok(address) => address.to_string(),
        Err(e) => format!("(unavailable: {})", e),
    };
    let ledger = match session.oracle() {
        Some(oracle) => oracle.ledger().describe(),
        None => "disabled".to_string(),
    };
    let fingerprint = match session.store().load()? {
        Some(envelope) => format!(
            "{} ({})",
            short_fingerprint(&IntegrityOracle::fingerprint(&envelope)?),
            envelope.scheme()
        ),
        None => "(no vault)".to_string(),
    };

    println!("Identity:    {}", identity);
    println!("Wallet RPC:  {}", config.rpc.url);
    println!("Ledger:      {}", ledger);
    println!("Vault file:  {}", config.vault_path()?.display());
    println!("Fingerprint: {}", fingerprint);

    Ok(())
}
