//! CLI entry point - the composition root.
//!
//! Infrastructure is wired in [`bootstrap`]; every command is dispatched to
//! a handler that works through the `CliContext`.

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use epdl_cli::{Cli, CliConfig, Commands, bootstrap, handlers};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads EPDL_*
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command.as_ref() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = CliConfig::from_cli(&cli)?;
    let mut ctx = bootstrap(config).await?;

    match command {
        Commands::Add(args) => handlers::add::execute(&ctx, args).await?,
        Commands::Download(args) => handlers::download::execute(&mut ctx, args).await?,
        Commands::List { json } => handlers::list::execute(&ctx, *json).await?,
        Commands::Remove {
            anime_id,
            episode_ids,
        } => handlers::remove::execute(&ctx, *anime_id, episode_ids).await?,
        Commands::Clear => handlers::clear::execute(&ctx).await?,
        Commands::Run => handlers::run::execute(&mut ctx).await?,
    }

    Ok(())
}
