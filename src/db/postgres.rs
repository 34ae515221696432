use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{queries, CompletedAnalysis, JobStore, StoreError};
use crate::models::image::ImageRecord;
use crate::models::job::{AnalysisJob, JobStatus};

/// PostgreSQL-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get_image(&self, image_id: i64) -> Result<Option<ImageRecord>, StoreError> {
        Ok(queries::get_image(&self.pool, image_id).await?)
    }

    async fn find_by_image(&self, image_id: i64) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(queries::get_job_by_image(&self.pool, image_id).await?)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(queries::get_job(&self.pool, job_id).await?)
    }

    async fn jobs_for_inspection(
        &self,
        inspection_id: i64,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(queries::get_jobs_by_inspection(&self.pool, inspection_id).await?)
    }

    async fn insert_queued(&self, image_id: i64) -> Result<AnalysisJob, StoreError> {
        if let Some(job) = queries::insert_queued_job(&self.pool, Uuid::new_v4(), image_id).await? {
            return Ok(job);
        }

        // Lost the unique-index race; hand back the winner.
        queries::get_job_by_image(&self.pool, image_id)
            .await?
            .ok_or(StoreError::ImageNotFound(image_id))
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        Ok(queries::count_by_status(&self.pool, status).await?)
    }

    async fn next_queued(&self) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(queries::next_queued_job(&self.pool).await?)
    }

    async fn mark_processing(
        &self,
        job_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(queries::mark_processing(&self.pool, job_id, started_at).await? > 0)
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        image_id: i64,
        outcome: &CompletedAnalysis,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = queries::mark_completed(
            &self.pool,
            job_id,
            image_id,
            &outcome.result_json,
            &outcome.boxed_image_path,
            completed_at,
        )
        .await?;

        Ok(updated > 0)
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(queries::mark_failed(&self.pool, job_id, error_message, completed_at).await? > 0)
    }

    async fn recompute_queue_positions(&self) -> Result<u64, StoreError> {
        Ok(queries::recompute_queue_positions(&self.pool).await?)
    }

    async fn stale_processing(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(queries::get_stale_processing(&self.pool, started_before).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
