//! Scripted inference backend for tests and dry runs.
//!
//! ```rust
//! use anomaly_queue::services::inference::MockInferenceBackend;
//!
//! let backend = MockInferenceBackend::new()
//!     .with_label("hotspot")
//!     .failing_for("broken.jpg", "model crashed");
//! assert!(backend.calls().is_empty());
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{InferenceBackend, InferenceError};
use crate::models::inference::{base_name, InferenceRequest, InferenceResult};

/// One recorded `infer` call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub image_id: i64,
    pub filename: String,
    pub sensitivity: f64,
    pub feedback_json: String,
}

#[derive(Debug, Clone)]
struct MockConfig {
    label: String,
    ext: String,
    failures: HashMap<String, String>,
    latency: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            label: "normal".to_string(),
            ext: ".jpg".to_string(),
            failures: HashMap::new(),
            latency: Duration::ZERO,
        }
    }
}

/// Returns `{"label": <label>, "boxes": []}` for every image, except the
/// file names registered with [`MockInferenceBackend::failing_for`].
#[derive(Clone, Default)]
pub struct MockInferenceBackend {
    config: Arc<MockConfig>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockInferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).label = label.into();
        self
    }

    /// Extension reported for the boxed image, with leading dot.
    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).ext = ext.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    pub fn failing_for(mut self, filename: impl Into<String>, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .failures
            .insert(filename.into(), message.into());
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InferenceBackend for MockInferenceBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResult, InferenceError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                image_id: request.image_id,
                filename: request.filename.clone(),
                sensitivity: request.sensitivity,
                feedback_json: request.feedback_json.clone(),
            });
        }

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if let Some(message) = self.config.failures.get(&request.filename) {
            return Err(InferenceError::Remote(message.clone()));
        }

        let json_text = serde_json::json!({ "label": self.config.label, "boxes": [] }).to_string();
        let mut boxed_image = b"boxed:".to_vec();
        boxed_image.extend_from_slice(base_name(&request.filename).as_bytes());

        Ok(InferenceResult {
            label: self.config.label.clone(),
            boxed_image,
            boxed_image_ext: self.config.ext.clone(),
            json_text,
        })
    }
}
