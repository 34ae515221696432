use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of an anomaly-analysis job.
///
/// Stored in the database as the upper-case variant name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One image's progress through the anomaly-detection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub image_id: i64,
    pub status: JobStatus,
    /// 1-based rank among QUEUED jobs. `None` once the job has left the queue.
    pub queue_position: Option<i32>,
    pub result_json: Option<String>,
    pub boxed_image_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    /// A fresh QUEUED job at the given position.
    pub fn queued(image_id: i64, queue_position: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_id,
            status: JobStatus::Queued,
            queue_position: Some(queue_position),
            result_json: None,
            boxed_image_path: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Point-in-time queue counts. Advisory only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QueueStatus {
    pub queued_count: i64,
    pub processing_count: i64,
}

/// Compute contiguous queue positions for the QUEUED subset of `jobs`.
///
/// Jobs are ranked by `created_at` ascending; the sort is stable so equal
/// timestamps keep their slice order. Non-QUEUED jobs are ignored.
pub fn queue_positions(jobs: &[AnalysisJob]) -> Vec<(Uuid, i32)> {
    let mut queued: Vec<&AnalysisJob> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Queued)
        .collect();
    queued.sort_by_key(|j| j.created_at);

    queued
        .into_iter()
        .enumerate()
        .map(|(idx, job)| (job.id, idx as i32 + 1))
        .collect()
}
