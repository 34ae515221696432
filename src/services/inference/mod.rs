//! Inference backends.
//!
//! The worker only sees [`InferenceBackend`]; which transport sits behind it
//! is decided once at startup by [`build_backend`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, InferenceBackendKind};
use crate::models::inference::{InferenceRequest, InferenceResult};

pub mod local;
pub mod mock;
pub mod remote;

pub use local::LocalScriptBackend;
pub use mock::MockInferenceBackend;
pub use remote::RemoteHttpBackend;

/// Runs anomaly detection for one image.
///
/// Implementations must return an error rather than a partial result.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResult, InferenceError>;
}

/// Build the backend selected by configuration.
pub fn build_backend(config: &AppConfig) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
    match config.inference_backend {
        InferenceBackendKind::Local => Ok(Arc::new(LocalScriptBackend::new(
            config.model_dir.clone(),
            config.model_interpreter.clone(),
            config.model_script.clone(),
            config.venv_path.clone(),
            config.temp_dir.clone(),
            config.script_timeout(),
        ))),
        InferenceBackendKind::Remote => {
            let url = config
                .remote_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    InferenceError::Config("REMOTE_URL is required for the remote backend".into())
                })?;
            Ok(Arc::new(RemoteHttpBackend::new(url, config.remote_timeout())?))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Invalid inference request: {0}")]
    InvalidRequest(String),

    #[error("Inference backend misconfigured: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Analysis failed with exit code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference output missing: {0}")]
    MissingOutput(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Inference service reported an error: {0}")]
    Remote(String),

    #[error("Failed to decode boxed image: {0}")]
    Decode(String),

    #[error("Failed to parse inference result: {0}")]
    Parse(#[from] serde_json::Error),
}
