use owo_colors::{OwoColorize, Stream::Stdout};

use guardium::util::mask;

use super::Ctx;

/// Look up the first account whose site matches the argument.
pub fn run_get(ctx: &Ctx, args: crate::cli::GetArgs) -> anyhow::Result<()> {
    let session = ctx.unlock()?;
    let found = session.with_vault(|vault| vault.find_for_site(&args.site).cloned())?;
    session.lock();

    let Some(account) = found else {
        println!(
            "{}",
            format!("No account matches {}.", args.site).if_supports_color(Stdout, |t| t.yellow())
        );
        return Ok(());
    };

    println!("Site:     {}", account.site);
    println!("Username: {}", account.username);
    if args.show {
        println!("Password: {}", account.password);
    } else {
        println!("Password: {}  (use --show to reveal)", mask(&account.password));
    }
    Ok(())
}
