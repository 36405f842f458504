pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod exporter;
pub mod handlers;
pub mod metric;
pub mod query;
pub mod server;
pub mod signals;
pub mod target;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// Note: This function can only be called once per process.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
