mod handlers;

use axum::{routing::get, Router};
use codescore_common::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub report_path: PathBuf,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/scores", get(handlers::get_scores))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Codescore API booting...");

    let config = Config::load_default().map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;

    let state = Arc::new(AppState {
        report_path: config.paths.report_path.clone(),
    });
    info!(report = %state.report_path.display(), "Serving score report");

    // Start server
    let addr = config.server.listen_addr.as_str();
    let listener = TcpListener::bind(addr).await?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}
