//! Artifact cache CLI entry point
//!
//! Dispatches to subcommands.

use artifact_cache::cli::{commands, Cli, Commands, LogFormat};
use artifact_cache::config::ConfigManager;
use artifact_cache::error::{CacheError, CacheResult};
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

async fn run() -> CacheResult<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    debug!("Using config {}", config_manager.path().display());

    // An explicitly named config must exist, except when creating it
    if cli.config.is_some()
        && !config_manager.path().exists()
        && !matches!(cli.command, Commands::Config(_))
    {
        return Err(CacheError::ConfigNotFound(config_manager.path().to_path_buf()));
    }
    let config = config_manager.load().await?;

    match cli.command {
        Commands::Serve(args) => commands::serve(args, &config).await,
        Commands::Reap(args) => commands::reap(args, &config).await,
        Commands::Ls(args) => commands::ls(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug (including per-request traces)
fn init_logging(cli: &Cli) {
    let filter = match cli.verbose {
        0 => EnvFilter::new("artifact_cache=warn"),
        1 => EnvFilter::new("artifact_cache=info,tower_http=info"),
        _ => EnvFilter::new("artifact_cache=debug,tower_http=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match (cli.log_format, &cli.command) {
        (LogFormat::Json, _) => builder.json().init(),
        // The server is long-running; keep timestamps there
        (LogFormat::Text, Commands::Serve(_)) => builder.init(),
        (LogFormat::Text, _) => builder.without_time().init(),
    }
}
