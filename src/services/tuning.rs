use async_trait::async_trait;
use std::path::PathBuf;

use crate::models::feedback::FeedbackPayload;

/// Source of the detection knobs applied to each inference call.
///
/// The maintenance-record service owns the ML settings and the feedback
/// aggregation; the queue only reads their current output.
#[async_trait]
pub trait TuningProvider: Send + Sync {
    /// Detection sensitivity in [0, 1].
    async fn detection_sensitivity(&self) -> f64;

    async fn feedback_learning_rate(&self) -> f64;

    async fn feedback_payload(&self, learning_rate: f64) -> Result<FeedbackPayload, TuningError>;
}

/// Fixed sensitivity plus an optional feedback file re-read on every job.
#[derive(Debug, Clone)]
pub struct StaticTuning {
    sensitivity: f64,
    learning_rate: f64,
    feedback_file: Option<PathBuf>,
}

impl StaticTuning {
    pub fn new(sensitivity: f64, learning_rate: f64, feedback_file: Option<PathBuf>) -> Self {
        Self {
            sensitivity: clamp_sensitivity(sensitivity),
            learning_rate,
            feedback_file,
        }
    }
}

#[async_trait]
impl TuningProvider for StaticTuning {
    async fn detection_sensitivity(&self) -> f64 {
        self.sensitivity
    }

    async fn feedback_learning_rate(&self) -> f64 {
        self.learning_rate
    }

    async fn feedback_payload(&self, learning_rate: f64) -> Result<FeedbackPayload, TuningError> {
        let Some(path) = &self.feedback_file else {
            return Ok(FeedbackPayload::empty(learning_rate));
        };

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TuningError::Read(path.clone(), e))?;
        let mut payload: FeedbackPayload = serde_json::from_str(&text)?;
        payload.learning_rate = learning_rate;
        Ok(payload)
    }
}

/// Clamp into [0, 1]; non-finite input falls back to the midpoint.
pub fn clamp_sensitivity(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TuningError {
    #[error("Failed to read feedback file {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Invalid feedback payload: {0}")]
    Parse(#[from] serde_json::Error),
}
