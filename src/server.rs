use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{config::Config, exporter::Exporter, handlers, signals::setup_signal_handlers};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub exporter: Arc<Exporter>,
    pub metrics_path: String,
}

/// Start the exporter server
///
/// This function:
/// 1. Builds the scrape engine from the validated configuration
/// 2. Registers the process-wide default metrics
/// 3. Sets up signal handlers for graceful shutdown
/// 4. Creates the Axum application
/// 5. Serves requests until a shutdown signal arrives
pub async fn start_server(config: Config, listen_address: &str, metrics_path: &str) -> Result<()> {
    let exporter = Arc::new(Exporter::from_config(config)?);
    register_default_metrics()?;

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let state = AppState {
        exporter: exporter.clone(),
        metrics_path: metrics_path.to_string(),
    };
    let app = create_router(state, metrics_path);

    let addr: SocketAddr = listen_address.parse()?;
    info!(
        "Starting SQL exporter on {} ({} jobs, {} targets)",
        addr,
        exporter.config().jobs.len(),
        exporter.target_count()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
fn create_router(state: AppState, metrics_path: &str) -> Router {
    Router::new()
        .route("/", get(handlers::home::home))
        .route("/healthz", get(handlers::health::health))
        .route("/config", get(handlers::config_api::config))
        .route(metrics_path, get(handlers::metrics_handler::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Register the process-wide self metrics with the default registry. These
/// are merged into every scrape alongside the gathered families.
fn register_default_metrics() -> Result<()> {
    let build_info = prometheus::IntGauge::with_opts(
        prometheus::Opts::new(
            "sql_exporter_build_info",
            "Version of the running sql-exporter binary",
        )
        .const_label("version", env!("CARGO_PKG_VERSION")),
    )?;
    build_info.set(1);
    match prometheus::default_registry().register(Box::new(build_info)) {
        // Already registered when the server is restarted in-process (tests).
        Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
        Err(err) => return Err(err.into()),
    }

    #[cfg(target_os = "linux")]
    match prometheus::default_registry().register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    )) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
