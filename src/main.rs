use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use diffsplit::cli::{AppContext, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Flag-driven log level, overridable through RUST_LOG
    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("diffsplit={default_level}"))),
        )
        .with_target(false)
        .init();

    let ctx = AppContext {
        verbose: cli.verbose,
        debug: cli.debug,
    };

    match cli.command {
        Commands::Split(args) => diffsplit::commands::split_run(args, &ctx),
        Commands::Resplit(args) => diffsplit::commands::resplit_run(args, &ctx),
    }
}
