use owo_colors::{OwoColorize, Stream::Stdout};

use guardium::record::Account;

use super::{read_secret, save_error, Ctx};

pub fn run_add(ctx: &Ctx, args: crate::cli::AddArgs) -> anyhow::Result<()> {
    let session = ctx.unlock()?;
    let password = read_secret(&format!("Password for {}", args.site), true)?;

    let mut new_id = None;
    let result = session.mutate(|vault| {
        new_id = Some(vault.add_account(Account::new(&args.site, &args.username, &password))?);
        Ok(())
    });
    session.lock();
    result.map_err(save_error)?;

    println!(
        "{} {} ({})",
        "Saved".if_supports_color(Stdout, |t| t.green()),
        args.site,
        new_id.as_deref().unwrap_or("?")
    );
    Ok(())
}
