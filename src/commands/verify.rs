/// Verify command: compares the stored envelope's fingerprint with the ledger.
///
/// Needs no secret; the envelope is hashed as stored. `--retry` backs off and
/// retries only while the ledger is unreachable. A mismatch is never retried.
use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};
use owo_colors::{OwoColorize, Stream::Stdout};

use guardium::error::VaultError;
use guardium::ledger::IntegrityOracle;
use guardium::record::short_fingerprint;

use super::{error_line, warning_line, Ctx};

pub fn run_verify(ctx: &Ctx, args: crate::cli::VerifyArgs) -> anyhow::Result<()> {
    let session = ctx.session()?;
    let Some(oracle) = session.oracle() else {
        anyhow::bail!("Integrity checks are disabled ([ledger] backend = \"none\")");
    };
    let Some(envelope) = session.store().load()? else {
        return Err(VaultError::NoVaultFound.into());
    };

    let address = oracle.identity()?;
    let local = IntegrityOracle::fingerprint(&envelope)?;
    println!("Identity:    {}", address);
    println!("Fingerprint: {}", short_fingerprint(&local));

    let check = || oracle.verify(&envelope, &address);
    let outcome = if args.retry {
        check
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(2))
                    .with_max_delay(Duration::from_secs(8))
                    .with_max_times(4),
            )
            .sleep(std::thread::sleep)
            .when(VaultError::is_transient)
            .notify(|err: &VaultError, wait: Duration| {
                eprintln!("Ledger unavailable ({}), retrying in {}s...", err, wait.as_secs());
            })
            .call()
    } else {
        check()
    };

    match outcome {
        Ok(true) => {
            println!(
                "{}",
                "Vault matches its ledger record.".if_supports_color(Stdout, |t| t.green())
            );
            Ok(())
        }
        Ok(false) => {
            eprintln!(
                "{}",
                error_line(
                    "Vault does not match its ledger record. Local data may have been modified or rolled back."
                )
            );
            Err(VaultError::IntegrityViolation.into())
        }
        Err(e) if e.is_transient() => {
            eprintln!(
                "{}",
                warning_line("Could not reach the ledger. Check again later, or use --retry.")
            );
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
