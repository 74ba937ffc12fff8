/// List command: prints every saved account with masked passwords.
use comfy_table::{Cell, Color, Table};
use owo_colors::{OwoColorize, Stream::Stdout};

use guardium::util::mask;

use super::Ctx;

pub fn run_list(ctx: &Ctx) -> anyhow::Result<()> {
    let session = ctx.unlock()?;

    let table = session.with_vault(|vault| {
        if vault.accounts.is_empty() {
            return None;
        }
        let mut table = Table::new();
        table.set_header(vec!["Id", "Site", "Username", "Password"]);
        for account in &vault.accounts {
            table.add_row(vec![
                Cell::new(account.id.as_deref().unwrap_or("-")).fg(Color::DarkGrey),
                Cell::new(&account.site).fg(Color::Cyan),
                Cell::new(&account.username),
                Cell::new(mask(&account.password)),
            ]);
        }
        Some(table)
    })?;
    session.lock();

    match table {
        Some(table) => println!("{table}"),
        None => println!(
            "{}",
            "No saved accounts. Add one with guardium add <site>."
                .if_supports_color(Stdout, |t| t.yellow())
        ),
    }
    Ok(())
}
