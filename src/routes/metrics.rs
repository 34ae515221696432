use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: queue and inference metrics in Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the queue emits.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "analysis_jobs_enqueued_total",
        "Images queued for anomaly analysis"
    );
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Analysis jobs that completed successfully"
    );
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Analysis jobs that ended FAILED"
    );
    metrics::describe_gauge!(
        "analysis_queue_depth",
        "QUEUED jobs at the last status query"
    );
    metrics::describe_histogram!(
        "analysis_inference_seconds",
        "Wall time of one inference backend call"
    );
}
