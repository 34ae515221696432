//! Shared harness for worker and queue tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use anomaly_queue::db::{CompletedAnalysis, JobStore, MemoryJobStore, StoreError};
use anomaly_queue::models::image::ImageRecord;
use anomaly_queue::models::job::{AnalysisJob, JobStatus};
use anomaly_queue::services::inference::{InferenceBackend, MockInferenceBackend};
use anomaly_queue::services::publisher::ArtifactPublisher;
use anomaly_queue::services::queue::QueueManager;
use anomaly_queue::services::tuning::StaticTuning;
use anomaly_queue::services::worker::{AnalysisWorker, WorkerSettings};

pub const INSPECTION_ID: i64 = 7;

/// An uploads tree in a temp dir plus an in-memory store and queue.
pub struct Harness {
    pub uploads: TempDir,
    pub store: Arc<MemoryJobStore>,
    pub queue: QueueManager,
}

impl Harness {
    pub fn new() -> Self {
        let uploads = tempfile::tempdir().expect("create uploads dir");
        let store = Arc::new(MemoryJobStore::new());
        let queue = QueueManager::new(store.clone());
        Self {
            uploads,
            store,
            queue,
        }
    }

    pub fn root(&self) -> &Path {
        self.uploads.path()
    }

    /// Register an image and write its bytes under `inspections/<id>/`.
    pub fn add_image(&self, id: i64, file_name: &str) -> ImageRecord {
        let dir = self.root().join("inspections").join(INSPECTION_ID.to_string());
        std::fs::create_dir_all(&dir).expect("create inspection dir");
        std::fs::write(dir.join(file_name), format!("original:{file_name}")).expect("write image");
        self.add_image_record(id, file_name)
    }

    /// Register an image without creating its file.
    pub fn add_image_record(&self, id: i64, file_name: &str) -> ImageRecord {
        let image = ImageRecord {
            id,
            inspection_id: INSPECTION_ID,
            file_path: format!("/uploads/inspections/{INSPECTION_ID}/{file_name}"),
        };
        self.store.insert_image(image.clone());
        image
    }

    pub async fn image(&self, id: i64) -> ImageRecord {
        self.store
            .get_image(id)
            .await
            .expect("store available")
            .expect("image exists")
    }

    pub fn worker(&self, backend: MockInferenceBackend) -> AnalysisWorker {
        self.worker_with(Arc::new(backend), 0.5)
    }

    pub fn worker_with(&self, backend: Arc<dyn InferenceBackend>, sensitivity: f64) -> AnalysisWorker {
        self.worker_over(self.store.clone(), backend, sensitivity)
    }

    /// Worker reading and writing through `store` instead of the harness store.
    pub fn worker_over(
        &self,
        store: Arc<dyn JobStore>,
        backend: Arc<dyn InferenceBackend>,
        sensitivity: f64,
    ) -> AnalysisWorker {
        AnalysisWorker::new(
            store,
            backend,
            Arc::new(StaticTuning::new(sensitivity, 0.1, None)),
            ArtifactPublisher::new(self.root()),
            self.queue.wake_handle(),
            WorkerSettings {
                poll_interval: Duration::from_millis(20),
                error_backoff: Duration::from_millis(20),
            },
        )
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Delegates to a [`MemoryJobStore`] with two injectable faults: image reads
/// that fail, and a one-shot stale answer from `next_queued` as seen by a
/// worker racing another process.
pub struct ScriptedStore {
    inner: Arc<MemoryJobStore>,
    fail_image_reads: AtomicBool,
    stale_next: Mutex<Option<AnalysisJob>>,
}

impl ScriptedStore {
    pub fn new(inner: Arc<MemoryJobStore>) -> Self {
        Self {
            inner,
            fail_image_reads: AtomicBool::new(false),
            stale_next: Mutex::new(None),
        }
    }

    pub fn fail_image_reads(&self, fail: bool) {
        self.fail_image_reads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `next_queued` call return `job` as it looked earlier.
    pub fn serve_stale_next(&self, job: AnalysisJob) {
        *self.stale_next.lock().unwrap() = Some(job);
    }
}

#[async_trait]
impl JobStore for ScriptedStore {
    async fn get_image(&self, image_id: i64) -> Result<Option<ImageRecord>, StoreError> {
        if self.fail_image_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("image table offline".into()));
        }
        self.inner.get_image(image_id).await
    }

    async fn find_by_image(&self, image_id: i64) -> Result<Option<AnalysisJob>, StoreError> {
        self.inner.find_by_image(image_id).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn jobs_for_inspection(&self, inspection_id: i64) -> Result<Vec<AnalysisJob>, StoreError> {
        self.inner.jobs_for_inspection(inspection_id).await
    }

    async fn insert_queued(&self, image_id: i64) -> Result<AnalysisJob, StoreError> {
        self.inner.insert_queued(image_id).await
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        self.inner.count_by_status(status).await
    }

    async fn next_queued(&self) -> Result<Option<AnalysisJob>, StoreError> {
        let stale = self.stale_next.lock().unwrap().take();
        if stale.is_some() {
            return Ok(stale);
        }
        self.inner.next_queued().await
    }

    async fn mark_processing(&self, job_id: Uuid, started_at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.mark_processing(job_id, started_at).await
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        image_id: i64,
        outcome: &CompletedAnalysis,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner
            .mark_completed(job_id, image_id, outcome, completed_at)
            .await
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.mark_failed(job_id, error_message, completed_at).await
    }

    async fn recompute_queue_positions(&self) -> Result<u64, StoreError> {
        self.inner.recompute_queue_positions().await
    }

    async fn stale_processing(&self, started_before: DateTime<Utc>) -> Result<Vec<AnalysisJob>, StoreError> {
        self.inner.stale_processing(started_before).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}
