//! Tripwire CLI entry point.

use clap::Parser;

use tripwire::cli::commands;
use tripwire::cli::{handle_error, Cli, Commands};
use tripwire::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match commands::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err.context("Failed to initialize logging"), cli.json),
    };

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Ingest(args) => commands::ingest::execute(args, config, cli.json).await,
        Commands::Preview(args) => commands::preview::execute(args, config, cli.json).await,
        Commands::Config => commands::config::execute(config, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
