//! blechat - chat over a BLE GATT characteristic

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blechat_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;

    CommandDispatcher::execute(cli.command, config)
        .await
        .context("Command execution failed")?;

    info!("blechat exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level; `RUST_LOG` wins when set
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> anyhow::Result<AppConfig> {
    match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            AppConfig::load_from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path))
        }
        None => {
            info!("Using default configuration");
            Ok(AppConfig::default())
        }
    }
}
