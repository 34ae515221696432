use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::JobStore;
use crate::services::{
    inference::{build_backend, InferenceError},
    publisher::ArtifactPublisher,
    queue::QueueManager,
    tuning::StaticTuning,
    worker::{AnalysisWorker, WorkerSettings},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<QueueManager>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        let queue = Arc::new(QueueManager::new(store.clone()));
        Self { store, queue }
    }

    /// Build the analysis worker over this state's store, woken by its queue.
    pub fn worker(&self, config: &AppConfig) -> Result<AnalysisWorker, InferenceError> {
        let backend = build_backend(config)?;
        let tuning = StaticTuning::new(
            config.detection_sensitivity,
            config.feedback_learning_rate,
            config.feedback_file.clone(),
        );

        Ok(AnalysisWorker::new(
            self.store.clone(),
            backend,
            Arc::new(tuning),
            ArtifactPublisher::new(config.uploads_root.clone()),
            self.queue.wake_handle(),
            WorkerSettings {
                poll_interval: config.poll_interval(),
                error_backoff: config.error_backoff(),
            },
        ))
    }
}
