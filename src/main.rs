//! depcache CLI entry point

use clap::Parser;
use console::style;
use depcache::cli::{Cli, Commands};
use depcache::config::{CacheOverrides, ConfigManager};
use depcache::error::DepcacheResult;
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

async fn run() -> DepcacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);
    depcache::ui::init_theme();
    debug!("Loaded configuration from {}", config_manager.path().display());

    let overrides = CacheOverrides {
        omnicache: cli.omnicache,
        extdep: cli.extdep_cache,
        no_cache: cli.no_cache,
    };

    match cli.command {
        Commands::Fetch(args) => depcache::cli::commands::fetch(args, &config, &overrides).await,
        Commands::Sync(args) => depcache::cli::commands::sync(args, &config, &overrides).await,
        Commands::Cache(args) => depcache::cli::commands::cache(args, &config, &overrides).await,
        Commands::Config(args) => {
            depcache::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// Logs go to stderr: 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins
fn init_logging(verbose: u8, format: &str) {
    let level = match verbose {
        0 => "depcache=warn",
        1 => "depcache=info",
        _ => "depcache=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
