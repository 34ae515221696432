//! The single analysis worker.
//!
//! One loop, one job in flight: take the oldest QUEUED job, mark it
//! PROCESSING, run inference, publish artifacts, persist the terminal state,
//! then renumber the queue.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{CompletedAnalysis, JobStore, StoreError};
use crate::models::image::ImageRecord;
use crate::models::inference::{DetectionReport, InferenceRequest};
use crate::models::job::{AnalysisJob, JobStatus};
use crate::services::inference::{InferenceBackend, InferenceError};
use crate::services::publisher::{ArtifactPublisher, PublishError, PublishedArtifacts};
use crate::services::tuning::{clamp_sensitivity, TuningError, TuningProvider};

/// Error message stored on jobs failed by startup reconciliation.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted: worker stopped while the job was processing";

/// Labels from the feedback payload included in logs.
const FEEDBACK_LOG_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Sleep when the queue is empty.
    pub poll_interval: Duration,
    /// Sleep after an infrastructure error.
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
        }
    }
}

/// Terminal state reached by one processed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error_message: Option<String>,
}

pub struct AnalysisWorker {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn InferenceBackend>,
    tuning: Arc<dyn TuningProvider>,
    publisher: ArtifactPublisher,
    wake: Arc<Notify>,
    settings: WorkerSettings,
}

impl AnalysisWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn InferenceBackend>,
        tuning: Arc<dyn TuningProvider>,
        publisher: ArtifactPublisher,
        wake: Arc<Notify>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            backend,
            tuning,
            publisher,
            wake,
            settings,
        }
    }

    /// Run [`AnalysisWorker::run`] on a background task.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Process jobs until `cancel` fires.
    ///
    /// Job failures are recorded on the job. Store failures are logged and
    /// retried after the backoff; they never end the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(backend = self.backend.name(), "Analysis worker started");

        while !cancel.is_cancelled() {
            match self.process_next_job().await {
                Ok(Some(outcome)) => {
                    tracing::debug!(job_id = %outcome.job_id, status = %outcome.status, "Job finished, checking for next job");
                }
                Ok(None) => {
                    tracing::trace!("No queued jobs, sleeping");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error in analysis worker, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Analysis worker stopped");
    }

    /// Process the oldest QUEUED job, if any.
    ///
    /// Returns `Ok(None)` when the queue is empty. An `Err` means the store
    /// could not be read or written; the job's own failures come back as
    /// `Ok(Some(outcome))` with status FAILED.
    pub async fn process_next_job(&self) -> Result<Option<JobOutcome>, WorkerError> {
        let (job, image) = loop {
            let Some(job) = self.store.next_queued().await? else {
                return Ok(None);
            };

            // Read before the claim so a store outage leaves the job QUEUED.
            let image = self.store.get_image(job.image_id).await?;

            // Visible as in-flight before the backend is called.
            if self.store.mark_processing(job.id, Utc::now()).await? {
                break (job, image);
            }
            tracing::debug!(job_id = %job.id, "Job claimed by another worker, trying next");
        };

        tracing::info!(job_id = %job.id, image_id = job.image_id, "Processing analysis job");

        let outcome = match self.analyze(&job, image.as_ref()).await {
            Ok(published) => {
                let completed = CompletedAnalysis {
                    result_json: published.json_text,
                    boxed_image_path: published.artifacts.boxed_image_path.clone(),
                };
                let recorded = self
                    .store
                    .mark_completed(job.id, job.image_id, &completed, Utc::now())
                    .await?;

                if recorded {
                    metrics::counter!("analysis_jobs_completed_total").increment(1);
                    tracing::info!(
                        job_id = %job.id,
                        label = %published.label,
                        boxed_image_path = %completed.boxed_image_path,
                        "Completed analysis job"
                    );
                    JobOutcome {
                        job_id: job.id,
                        status: JobStatus::Completed,
                        error_message: None,
                    }
                } else {
                    tracing::warn!(job_id = %job.id, "Job left PROCESSING before completion was recorded, result discarded");
                    self.current_outcome(job.id).await?
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(job_id = %job.id, image_id = job.image_id, error = %message, "Failed to process analysis job");

                if self.store.mark_failed(job.id, &message, Utc::now()).await? {
                    metrics::counter!("analysis_jobs_failed_total").increment(1);
                    JobOutcome {
                        job_id: job.id,
                        status: JobStatus::Failed,
                        error_message: Some(message),
                    }
                } else {
                    tracing::warn!(job_id = %job.id, "Job left PROCESSING before failure was recorded");
                    self.current_outcome(job.id).await?
                }
            }
        };

        let renumbered = self.store.recompute_queue_positions().await?;
        tracing::debug!(renumbered, "Queue positions updated");

        Ok(Some(outcome))
    }

    /// Fail PROCESSING jobs left behind by an unclean shutdown.
    ///
    /// Only jobs whose `started_at` is at least `older_than` in the past are
    /// touched. Returns the number of jobs failed.
    pub async fn reconcile_stale_jobs(&self, older_than: Duration) -> Result<usize, WorkerError> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let stale = self.store.stale_processing(cutoff).await?;
        let mut failed = 0;
        for job in &stale {
            tracing::warn!(job_id = %job.id, image_id = job.image_id, started_at = ?job.started_at, "Failing orphaned PROCESSING job");
            if self
                .store
                .mark_failed(job.id, INTERRUPTED_MESSAGE, Utc::now())
                .await?
            {
                failed += 1;
            }
        }

        if failed > 0 {
            self.store.recompute_queue_positions().await?;
        }
        Ok(failed)
    }

    /// Outcome as recorded by whoever moved the job out of PROCESSING.
    async fn current_outcome(&self, job_id: Uuid) -> Result<JobOutcome, WorkerError> {
        let current = self.store.get_job(job_id).await?;
        Ok(JobOutcome {
            job_id,
            status: current.as_ref().map_or(JobStatus::Failed, |j| j.status),
            error_message: current.and_then(|j| j.error_message),
        })
    }

    async fn analyze(
        &self,
        job: &AnalysisJob,
        image: Option<&ImageRecord>,
    ) -> Result<AnalysisOutput, JobError> {
        let image = image.ok_or(JobError::ImageMissing(job.image_id))?;

        let source = self.publisher.original_path(image.relative_path());
        let image_bytes = tokio::fs::read(&source)
            .await
            .map_err(|e| JobError::SourceMissing(source.clone(), e))?;

        let sensitivity = clamp_sensitivity(self.tuning.detection_sensitivity().await);
        let learning_rate = self.tuning.feedback_learning_rate().await;
        let feedback = self.tuning.feedback_payload(learning_rate).await?;

        tracing::info!(
            job_id = %job.id,
            sensitivity,
            learning_rate,
            global_adjustment = feedback.summary().global_adjustment,
            "Using detection settings"
        );
        if feedback.has_adjustments() {
            let labels = &feedback.summary().label_feedback;
            tracing::info!(job_id = %job.id, count = labels.len(), "Applying label adjustments from feedback");
            for f in labels.iter().take(FEEDBACK_LOG_LIMIT) {
                tracing::info!(
                    label = %f.label,
                    adjustment = f.adjustment,
                    count_delta = f.avg_count_delta,
                    area_ratio = f.avg_area_ratio,
                    confidence_delta = f.avg_confidence_delta,
                    "Feedback adjustment"
                );
            }
        } else {
            tracing::info!(job_id = %job.id, "No user feedback adjustments available yet");
        }

        let request = InferenceRequest {
            image_bytes,
            filename: image.file_name().to_string(),
            sensitivity,
            feedback_json: feedback.to_json_string(),
            image_id: image.id,
        };

        let start = Instant::now();
        let result = self.backend.infer(&request).await?;
        metrics::histogram!("analysis_inference_seconds").record(start.elapsed().as_secs_f64());

        match DetectionReport::parse(&result.json_text) {
            Ok(report) => tracing::info!(
                job_id = %job.id,
                label = %result.label,
                findings = report.findings.len(),
                inference_ms = start.elapsed().as_millis() as u64,
                "Inference complete"
            ),
            Err(_) => tracing::info!(
                job_id = %job.id,
                label = %result.label,
                inference_ms = start.elapsed().as_millis() as u64,
                "Inference complete"
            ),
        }

        let artifacts = self.publisher.publish(&request.filename, &result).await?;

        Ok(AnalysisOutput {
            label: result.label,
            json_text: result.json_text,
            artifacts,
        })
    }
}

struct AnalysisOutput {
    label: String,
    json_text: String,
    artifacts: PublishedArtifacts,
}

/// Failures that end a single job as FAILED.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Image {0} no longer exists")]
    ImageMissing(i64),

    #[error("Original image file not found: {}", .0.display())]
    SourceMissing(PathBuf, #[source] std::io::Error),

    #[error(transparent)]
    Tuning(#[from] TuningError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Failures of the loop itself.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
