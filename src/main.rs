//! simreg CLI entry point.

use clap::Parser;

use simreg::cli::commands::{classify, expand, run};
use simreg::cli::{handle_error, load_config, Cli, Commands};
use simreg::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let mut log_config = LogConfig::from(&config.logging);
    match cli.verbose {
        0 => {}
        1 => log_config.level = "debug".to_string(),
        _ => log_config.level = "trace".to_string(),
    }
    let logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match &cli.command {
        Commands::Run(args) => run::execute(args, config, cli.json).await,
        Commands::Expand(args) => expand::execute(args, cli.json),
        Commands::Classify(args) => classify::execute(args, &config, cli.json),
    };

    match result {
        Ok(code) => {
            drop(logger);
            std::process::exit(code)
        }
        Err(err) => handle_error(err, cli.json),
    }
}
