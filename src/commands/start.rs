use anyhow::Result;
use colored::Colorize;
use sql_exporter::{config::Config, server};
use std::path::PathBuf;
use tracing::info;

/// Execute the start command
///
/// Loads and validates the configuration, then runs the server until a
/// shutdown signal arrives.
pub async fn execute(
    config_path: PathBuf,
    listen_address: String,
    metrics_path: String,
) -> Result<()> {
    println!("{}", "Starting SQL exporter...".green());

    let config = Config::load(&config_path)?;
    info!(
        config_file = %config_path.display(),
        jobs = config.jobs.len(),
        targets = config.target_count(),
        "configuration loaded"
    );

    server::start_server(config, &listen_address, &metrics_path).await
}
