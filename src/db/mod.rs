use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::image::ImageRecord;
use crate::models::job::{AnalysisJob, JobStatus};

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Outputs written to a job when its analysis succeeds.
#[derive(Debug, Clone)]
pub struct CompletedAnalysis {
    pub result_json: String,
    pub boxed_image_path: String,
}

/// Durable storage for analysis jobs and the image paths they rewrite.
///
/// Every method is a single statement or a single transaction, so a reader
/// never observes a half-updated job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_image(&self, image_id: i64) -> Result<Option<ImageRecord>, StoreError>;

    async fn find_by_image(&self, image_id: i64) -> Result<Option<AnalysisJob>, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, StoreError>;

    /// All jobs whose image belongs to the inspection, oldest first.
    async fn jobs_for_inspection(&self, inspection_id: i64)
        -> Result<Vec<AnalysisJob>, StoreError>;

    /// Create a QUEUED job at position `count(QUEUED) + 1`.
    ///
    /// If a job for the image already exists (including one inserted by a
    /// concurrent caller) that job is returned instead.
    async fn insert_queued(&self, image_id: i64) -> Result<AnalysisJob, StoreError>;

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, StoreError>;

    /// Oldest QUEUED job by creation time.
    async fn next_queued(&self) -> Result<Option<AnalysisJob>, StoreError>;

    /// Claim a QUEUED job: move it to PROCESSING, clear its position, and
    /// renumber the rest.
    ///
    /// Returns `false` when the job is no longer QUEUED, i.e. another worker
    /// claimed it first.
    async fn mark_processing(&self, job_id: Uuid, started_at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Complete a PROCESSING job and point its image at the boxed artifact,
    /// atomically. Returns `false`, touching nothing, if the job has left
    /// PROCESSING.
    async fn mark_completed(
        &self,
        job_id: Uuid,
        image_id: i64,
        outcome: &CompletedAnalysis,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Fail a PROCESSING job. Returns `false` if the job has left PROCESSING.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Reassign contiguous positions to all QUEUED jobs. Returns how many
    /// rows changed.
    async fn recompute_queue_positions(&self) -> Result<u64, StoreError>;

    /// PROCESSING jobs whose `started_at` is at or before `started_before`.
    async fn stale_processing(&self, started_before: DateTime<Utc>)
        -> Result<Vec<AnalysisJob>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Image {0} not found")]
    ImageNotFound(i64),
}
