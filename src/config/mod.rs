use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which inference transport the worker talks to.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InferenceBackendKind {
    /// Out-of-process model runner on this host.
    #[default]
    Local,
    /// HTTP inference service.
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Operator API bind address (e.g., "0.0.0.0:3000"). Unused by the headless worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Root directory holding original uploads and the `analysis/` artifacts
    #[serde(default = "default_uploads_root")]
    pub uploads_root: PathBuf,

    #[serde(default)]
    pub inference_backend: InferenceBackendKind,

    /// Working directory of the local model runner
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Optional interpreter for the runner (e.g. `bash` or a venv python).
    /// When unset the script is executed directly.
    #[serde(default)]
    pub model_interpreter: Option<String>,

    /// Local model runner script, resolved relative to `model_dir`
    #[serde(default = "default_model_script")]
    pub model_script: String,

    /// Python virtualenv handed to the runner as `--venv`
    #[serde(default = "default_venv_path")]
    pub venv_path: String,

    /// Scratch space for per-job input/output directories
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,

    /// Remote inference endpoint, e.g. `https://host/infer`
    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Detection sensitivity in [0, 1]
    #[serde(default = "default_sensitivity")]
    pub detection_sensitivity: f64,

    #[serde(default = "default_learning_rate")]
    pub feedback_learning_rate: f64,

    /// Optional JSON file holding the current feedback payload
    #[serde(default)]
    pub feedback_file: Option<PathBuf>,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// PROCESSING jobs older than this at startup are failed. `0` fails all of them.
    #[serde(default)]
    pub stale_processing_secs: u64,

    /// Whether the API server also runs the worker loop
    #[serde(default = "default_true")]
    pub worker_in_process: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_uploads_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("Model_Inference")
}

fn default_model_script() -> String {
    "./run_inference.sh".to_string()
}

fn default_venv_path() -> String {
    ".venv".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp/anomaly-analysis")
}

fn default_script_timeout_secs() -> u64 {
    600
}

fn default_remote_timeout_secs() -> u64 {
    180
}

fn default_sensitivity() -> f64 {
    0.5
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_error_backoff_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn stale_processing_after(&self) -> Duration {
        Duration::from_secs(self.stale_processing_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, envy::Error> {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = from_pairs(&[("DATABASE_URL", "postgres://localhost/test")]).unwrap();

        assert_eq!(config.inference_backend, InferenceBackendKind::Local);
        assert_eq!(config.uploads_root, PathBuf::from("uploads"));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.error_backoff(), Duration::from_secs(10));
        assert_eq!(config.detection_sensitivity, 0.5);
        assert!(config.worker_in_process);
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn remote_backend_is_parsed() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/test"),
            ("INFERENCE_BACKEND", "remote"),
            ("REMOTE_URL", "http://infer.local/infer"),
            ("REMOTE_TIMEOUT_SECS", "30"),
        ])
        .unwrap();

        assert_eq!(config.inference_backend, InferenceBackendKind::Remote);
        assert_eq!(config.remote_url.as_deref(), Some("http://infer.local/infer"));
        assert_eq!(config.remote_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(from_pairs(&[]).is_err());
    }
}
