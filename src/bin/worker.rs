use anomaly_queue::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgJobStore},
    routes::metrics::describe_metrics,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting anomaly analysis worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    describe_metrics();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Enqueues happen in another process, so this worker relies on polling.
    let state = AppState::new(Arc::new(PgJobStore::new(db_pool)));
    let worker = state
        .worker(&config)
        .expect("Failed to initialize inference backend");

    match worker
        .reconcile_stale_jobs(config.stale_processing_after())
        .await
    {
        Ok(0) => {}
        Ok(n) => tracing::warn!(count = n, "Failed orphaned PROCESSING jobs at startup"),
        Err(e) => tracing::error!(error = %e, "Startup reconciliation failed"),
    }

    let cancel = CancellationToken::new();
    let handle = Arc::new(worker).spawn(cancel.clone());

    tracing::info!(backend = ?config.inference_backend, "Worker ready, starting job processing loop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received, finishing current job");
    cancel.cancel();

    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Analysis worker task panicked");
    }
}
