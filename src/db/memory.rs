use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{CompletedAnalysis, JobStore, StoreError};
use crate::models::image::ImageRecord;
use crate::models::job::{queue_positions, AnalysisJob, JobStatus};

#[derive(Default)]
struct State {
    images: HashMap<i64, ImageRecord>,
    /// Insertion order doubles as the creation-order tie-breaker.
    jobs: Vec<AnalysisJob>,
}

impl State {
    /// The job, only while it is still in `status`.
    fn job_in(&mut self, job_id: Uuid, status: JobStatus) -> Option<&mut AnalysisJob> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == status)
    }

    fn renumber(&mut self) -> u64 {
        let positions: HashMap<Uuid, i32> = queue_positions(&self.jobs).into_iter().collect();
        let mut changed = 0;
        for job in self.jobs.iter_mut() {
            if let Some(&pos) = positions.get(&job.id) {
                if job.queue_position != Some(pos) {
                    job.queue_position = Some(pos);
                    changed += 1;
                }
            }
        }
        changed
    }
}

/// In-process [`JobStore`] guarded by a single mutex.
///
/// Used by tests and by deployments that embed the queue without a database.
/// `set_unavailable(true)` makes every call fail, simulating a storage outage.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&self, image: ImageRecord) {
        if let Ok(mut state) = self.state.lock() {
            state.images.insert(image.id, image);
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get_image(&self, image_id: i64) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.state()?.images.get(&image_id).cloned())
    }

    async fn find_by_image(&self, image_id: i64) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self
            .state()?
            .jobs
            .iter()
            .find(|j| j.image_id == image_id)
            .cloned())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.state()?.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn jobs_for_inspection(
        &self,
        inspection_id: i64,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let state = self.state()?;
        let mut jobs: Vec<AnalysisJob> = state
            .jobs
            .iter()
            .filter(|j| {
                state
                    .images
                    .get(&j.image_id)
                    .is_some_and(|img| img.inspection_id == inspection_id)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn insert_queued(&self, image_id: i64) -> Result<AnalysisJob, StoreError> {
        let mut state = self.state()?;
        if let Some(existing) = state.jobs.iter().find(|j| j.image_id == image_id) {
            return Ok(existing.clone());
        }
        if !state.images.contains_key(&image_id) {
            return Err(StoreError::ImageNotFound(image_id));
        }

        let queued = state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .count() as i32;
        let job = AnalysisJob::queued(image_id, queued + 1);
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        Ok(self
            .state()?
            .jobs
            .iter()
            .filter(|j| j.status == status)
            .count() as i64)
    }

    async fn next_queued(&self) -> Result<Option<AnalysisJob>, StoreError> {
        let state = self.state()?;
        // min_by_key returns the first of equal keys, preserving insertion order.
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| j.created_at)
            .cloned())
    }

    async fn mark_processing(
        &self,
        job_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let Some(job) = state.job_in(job_id, JobStatus::Queued) else {
            return Ok(false);
        };
        job.status = JobStatus::Processing;
        job.started_at = Some(started_at);
        job.queue_position = None;
        state.renumber();
        Ok(true)
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        image_id: i64,
        outcome: &CompletedAnalysis,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        // Validate both rows before touching either.
        if state.job_in(job_id, JobStatus::Processing).is_none() {
            return Ok(false);
        }
        let image = state
            .images
            .get_mut(&image_id)
            .ok_or(StoreError::ImageNotFound(image_id))?;
        image.file_path = outcome.boxed_image_path.clone();

        let Some(job) = state.job_in(job_id, JobStatus::Processing) else {
            return Ok(false);
        };
        job.status = JobStatus::Completed;
        job.result_json = Some(outcome.result_json.clone());
        job.boxed_image_path = Some(outcome.boxed_image_path.clone());
        job.error_message = None;
        job.queue_position = None;
        job.completed_at = Some(completed_at);
        Ok(true)
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let Some(job) = state.job_in(job_id, JobStatus::Processing) else {
            return Ok(false);
        };
        job.status = JobStatus::Failed;
        job.error_message = Some(error_message.to_string());
        job.queue_position = None;
        job.completed_at = Some(completed_at);
        Ok(true)
    }

    async fn recompute_queue_positions(&self) -> Result<u64, StoreError> {
        Ok(self.state()?.renumber())
    }

    async fn stale_processing(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(self
            .state()?
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Processing)
            .filter(|j| j.started_at.map_or(true, |t| t <= started_before))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.state().map(|_| ())
    }
}
