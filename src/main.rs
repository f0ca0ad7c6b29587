//! candy-deploy CLI entry point
//!
//! Dispatches to subcommands.

use candy_deploy::cli::commands::{self, Target};
use candy_deploy::cli::{Cli, Commands};
use candy_deploy::config::ConfigManager;
use candy_deploy::error::DeployResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> DeployResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let settings = config_manager.load().await?;

    // 0 = warn (spinners only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("candy_deploy=warn"),
        1 => EnvFilter::new("candy_deploy=info"),
        _ => EnvFilter::new("candy_deploy=debug"),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if settings.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }
    debug!("Using config {}", config_manager.path().display());

    let target = Target::resolve(&cli, &settings);
    debug!("Cache file {}", target.cache.path().display());

    match cli.command {
        Commands::Verify(args) => commands::verify(args, &settings, &target).await,
        Commands::Status(args) => commands::status(args, &target).await,
        Commands::Config(args) => commands::config(args, &config_manager, &settings).await,
    }
}
