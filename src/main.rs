mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

/// Log filter variable; defaults to `warn`.
const LOG_ENV: &str = "GUARDIUM_LOG";

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let ctx = commands::Ctx::load(cli.config.as_deref(), cli.wallet)?;

    match cli.command {
        Commands::Init => commands::init::run_init(&ctx)?,
        Commands::Add(args) => commands::add::run_add(&ctx, args)?,
        Commands::List => commands::list::run_list(&ctx)?,
        Commands::Get(args) => commands::get::run_get(&ctx, args)?,
        Commands::Remove(args) => commands::remove::run_remove(&ctx, args)?,
        Commands::Verify(args) => commands::verify::run_verify(&ctx, args)?,
        Commands::Whoami => commands::whoami::run_whoami(&ctx)?,
    }

    Ok(())
}
