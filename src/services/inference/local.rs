use async_trait::async_trait;
use chrono::Utc;
use garde::Validate;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::{InferenceBackend, InferenceError};
use crate::models::inference::{base_name, DetectionReport, InferenceRequest, InferenceResult};

const FEEDBACK_FILE_NAME: &str = "feedback_adjustments.json";

/// Runs the model as a child process against a per-job scratch directory.
///
/// Layout under `temp_dir/job_<image>_<millis>/`:
/// `input/<file>`, `output/boxed/<base>.json`, `output/boxed/<base>_boxed.*`,
/// and the feedback payload file.
pub struct LocalScriptBackend {
    model_dir: PathBuf,
    interpreter: Option<String>,
    script: String,
    venv_path: String,
    temp_dir: PathBuf,
    timeout: Duration,
}

impl LocalScriptBackend {
    pub fn new(
        model_dir: PathBuf,
        interpreter: Option<String>,
        script: String,
        venv_path: String,
        temp_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            model_dir,
            interpreter,
            script,
            venv_path,
            temp_dir,
            timeout,
        }
    }

    async fn prepare_job_dir(&self, request: &InferenceRequest) -> Result<PathBuf, InferenceError> {
        let job_dir = self.temp_dir.join(format!(
            "job_{}_{}",
            request.image_id,
            Utc::now().timestamp_millis()
        ));
        if tokio::fs::try_exists(&job_dir).await? {
            tokio::fs::remove_dir_all(&job_dir).await?;
        }
        tokio::fs::create_dir_all(job_dir.join("input")).await?;
        tokio::fs::create_dir_all(job_dir.join("output")).await?;

        // Absolute, since the runner's working directory is the model dir.
        Ok(tokio::fs::canonicalize(&job_dir).await?)
    }

    async fn run(&self, job_dir: &Path, request: &InferenceRequest) -> Result<InferenceResult, InferenceError> {
        let input_dir = job_dir.join("input");
        let output_dir = job_dir.join("output");
        let feedback_path = job_dir.join(FEEDBACK_FILE_NAME);

        tokio::fs::write(input_dir.join(&request.filename), &request.image_bytes).await?;
        tokio::fs::write(&feedback_path, &request.feedback_json).await?;

        let model_dir = tokio::fs::canonicalize(&self.model_dir).await.map_err(|e| {
            InferenceError::Config(format!(
                "model directory {} is not accessible: {e}",
                self.model_dir.display()
            ))
        })?;
        let script = model_dir.join(&self.script);

        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&script);
                cmd
            }
            None => Command::new(&script),
        };
        cmd.current_dir(&model_dir)
            .arg("--venv")
            .arg(&self.venv_path)
            .arg("--input")
            .arg(&input_dir)
            .arg("--outdir")
            .arg(&output_dir)
            .arg("--sensitivity")
            .arg(format!("{:.2}", request.sensitivity))
            .arg("--feedback")
            .arg(&feedback_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            image_id = request.image_id,
            script = %script.display(),
            input = %input_dir.display(),
            output = %output_dir.display(),
            sensitivity = request.sensitivity,
            "Running local model runner"
        );

        let start = Instant::now();
        // On timeout the child is dropped, which kills it.
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| InferenceError::Timeout(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines() {
            tracing::debug!(image_id = request.image_id, "Runner output: {line}");
        }
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            tracing::warn!(image_id = request.image_id, "Runner error: {line}");
        }

        if !output.status.success() {
            return Err(InferenceError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        tracing::debug!(
            image_id = request.image_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Local model runner finished"
        );

        read_outputs(&output_dir.join("boxed"), base_name(&request.filename)).await
    }
}

#[async_trait]
impl InferenceBackend for LocalScriptBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResult, InferenceError> {
        request
            .validate()
            .map_err(|e| InferenceError::InvalidRequest(e.to_string()))?;

        let job_dir = self.prepare_job_dir(request).await?;
        let result = self.run(&job_dir, request).await;

        if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
            tracing::warn!(dir = %job_dir.display(), error = %e, "Failed to clean up temp directory");
        }

        result
    }
}

/// Collect `<base>.json` and the first `<base>_boxed*` file from `boxed_dir`.
async fn read_outputs(boxed_dir: &Path, base: &str) -> Result<InferenceResult, InferenceError> {
    let json_path = boxed_dir.join(format!("{base}.json"));
    if !tokio::fs::try_exists(&json_path).await? {
        return Err(InferenceError::MissingOutput(format!(
            "JSON result file not found: {}",
            json_path.display()
        )));
    }
    let json_text = tokio::fs::read_to_string(&json_path).await?;
    let report = DetectionReport::parse(&json_text)?;

    let prefix = format!("{base}_boxed");
    let mut boxed_path = None;
    let mut entries = tokio::fs::read_dir(boxed_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            boxed_path = Some(entry.path());
            break;
        }
    }
    let boxed_path = boxed_path.ok_or_else(|| {
        InferenceError::MissingOutput(format!("Boxed image not found for: {base}"))
    })?;

    let boxed_image = tokio::fs::read(&boxed_path).await?;
    let boxed_image_ext = boxed_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".png".to_string());

    Ok(InferenceResult {
        label: report.label,
        boxed_image,
        boxed_image_ext,
        json_text,
    })
}
