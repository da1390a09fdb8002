//! Serve command - run the HTTP cache with the scheduled reaper

use crate::cli::args::ServeArgs;
use crate::config::{Config, ConfigManager};
use crate::error::CacheResult;
use crate::reaper::{self, Reaper, RetentionPolicy};
use crate::server::{self, AppState};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> CacheResult<()> {
    let mut config = config.clone();
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(url) = args.public_url {
        config.server.public_url = Some(url);
    }

    let state = AppState::from_config(&config)?;
    let roots: Vec<PathBuf> = state
        .scopes
        .iter()
        .map(|scope| scope.root().path().to_path_buf())
        .collect();
    ConfigManager::ensure_storage_dirs(&config, &roots).await?;

    let scheduler = if config.reaper.interval_hours > 0 {
        let period = Duration::from_secs(u64::from(config.reaper.interval_hours) * 3600);
        info!(
            "Reaping files older than {} day(s) every {} hour(s)",
            config.reaper.expiration_days, config.reaper.interval_hours
        );
        Some(reaper::spawn_scheduler(
            Reaper::new(RetentionPolicy::new(config.reaper.expiration_days)),
            Arc::clone(&state.scopes),
            Arc::clone(&state.audit),
            period,
        ))
    } else {
        info!("Scheduled reaping disabled (interval_hours = 0)");
        None
    };

    for scope in state.scopes.iter() {
        println!(
            "  {} {:<16} {}",
            style("•").cyan(),
            scope.name(),
            style(scope.root().path().display()).dim()
        );
    }
    println!(
        "{} Listening on {} ({})",
        style("✓").green(),
        config.server.bind,
        config.server.public_url()
    );

    let result = server::serve(state, &config.server.bind).await;
    if let Some(handle) = scheduler {
        handle.abort();
    }
    result
}
