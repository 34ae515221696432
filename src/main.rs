use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use anomaly_queue::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgJobStore},
    routes,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing anomaly-queue server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let state = AppState::new(Arc::new(PgJobStore::new(db_pool)));
    let shutdown = CancellationToken::new();

    let worker_handle = if config.worker_in_process {
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

        tracing::info!(backend = ?config.inference_backend, "Starting in-process analysis worker");
        Some(Arc::new(worker).spawn(shutdown.clone()))
    } else {
        tracing::info!("In-process worker disabled; run the worker binary separately");
        None
    };

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/analysis/queue", get(routes::analysis::queue_status))
        .route(
            "/api/v1/analysis/images/{image_id}",
            get(routes::analysis::get_job_by_image).post(routes::analysis::enqueue_image),
        )
        .route("/api/v1/analysis/jobs/{job_id}", get(routes::analysis::get_job))
        .route(
            "/api/v1/analysis/inspections/{inspection_id}",
            get(routes::analysis::get_jobs_by_inspection),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024));

    tracing::info!("Starting anomaly-queue on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .expect("Server error");

    // The worker finishes its current job before exiting.
    shutdown.cancel();
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Analysis worker task panicked");
        }
    }
}
