use serde::{Deserialize, Serialize};

/// Per-label correction derived from engineer feedback on earlier detections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelFeedback {
    pub label: String,
    pub adjustment: f64,
    #[serde(default)]
    pub avg_count_delta: f64,
    #[serde(default)]
    pub avg_area_ratio: f64,
    #[serde(default)]
    pub avg_confidence_delta: f64,
}

/// Aggregate of all feedback adjustments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeedbackSummary {
    #[serde(default)]
    pub global_adjustment: f64,
    #[serde(default)]
    pub label_feedback: Vec<LabelFeedback>,
}

/// Feedback bundle passed verbatim to the inference backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeedbackPayload {
    #[serde(default)]
    pub learning_rate: f64,
    #[serde(flatten)]
    pub summary: FeedbackSummary,
}

impl FeedbackPayload {
    pub fn empty(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            summary: FeedbackSummary::default(),
        }
    }

    pub fn has_adjustments(&self) -> bool {
        self.summary.global_adjustment != 0.0 || !self.summary.label_feedback.is_empty()
    }

    pub fn summary(&self) -> &FeedbackSummary {
        &self.summary
    }

    pub fn to_json_string(&self) -> String {
        // Plain structs with string keys always serialize.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
