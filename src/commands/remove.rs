use std::io::IsTerminal;

use owo_colors::{OwoColorize, Stream::Stdout};

use guardium::error::VaultError;

use super::{save_error, Ctx};

pub fn run_remove(ctx: &Ctx, args: crate::cli::RemoveArgs) -> anyhow::Result<()> {
    let session = ctx.unlock()?;

    let skip_confirm = args.yes || !std::io::stdin().is_terminal();
    if !skip_confirm {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Remove {}?", args.target))
            .default(false)
            .interact()
            .map_err(|e| anyhow::anyhow!("prompt failed: {}", e))?;
        if !confirmed {
            session.lock();
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut removed = 0;
    let result = session.mutate(|vault| {
        removed = vault.remove_account(&args.target);
        if removed == 0 {
            return Err(VaultError::InvalidAccount(format!(
                "no account matches {}",
                args.target
            )));
        }
        Ok(())
    });
    session.lock();
    result.map_err(save_error)?;

    println!(
        "{} {} account(s)",
        "Removed".if_supports_color(Stdout, |t| t.green()),
        removed
    );
    Ok(())
}
