use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::{AnalysisJob, JobStatus, QueueStatus};

/// Entry point for callers that want images analysed.
///
/// Jobs live in the [`JobStore`]; the queue itself is just the QUEUED rows
/// ordered by creation time.
pub struct QueueManager {
    store: Arc<dyn JobStore>,
    wake: Arc<Notify>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Handle the worker waits on between polls.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Queue an image for analysis. Idempotent: an image that already has a
    /// job (in any state) gets that job back unchanged.
    pub async fn enqueue(&self, image_id: i64) -> Result<AnalysisJob, QueueError> {
        if let Some(existing) = self.store.find_by_image(image_id).await? {
            tracing::info!(image_id, job_id = %existing.id, "Analysis job already exists for image");
            return Ok(existing);
        }

        if self.store.get_image(image_id).await?.is_none() {
            return Err(QueueError::ImageNotFound(image_id));
        }

        let job = self.store.insert_queued(image_id).await?;
        metrics::counter!("analysis_jobs_enqueued_total").increment(1);
        tracing::info!(
            image_id,
            job_id = %job.id,
            queue_position = job.queue_position,
            "Queued image for analysis"
        );

        self.wake.notify_one();
        Ok(job)
    }

    pub async fn get_by_image(&self, image_id: i64) -> Result<Option<AnalysisJob>, QueueError> {
        Ok(self.store.find_by_image(image_id).await?)
    }

    pub async fn get_by_id(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, QueueError> {
        Ok(self.store.get_job(job_id).await?)
    }

    pub async fn get_by_inspection(&self, inspection_id: i64) -> Result<Vec<AnalysisJob>, QueueError> {
        Ok(self.store.jobs_for_inspection(inspection_id).await?)
    }

    /// Advisory counts; the two reads are not taken atomically.
    pub async fn queue_status(&self) -> Result<QueueStatus, QueueError> {
        let queued_count = self.store.count_by_status(JobStatus::Queued).await?;
        let processing_count = self.store.count_by_status(JobStatus::Processing).await?;
        metrics::gauge!("analysis_queue_depth").set(queued_count as f64);

        Ok(QueueStatus {
            queued_count,
            processing_count,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Image {0} not found")]
    ImageNotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}
