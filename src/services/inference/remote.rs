use async_trait::async_trait;
use base64::Engine;
use garde::Validate;
use reqwest::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;

use super::{InferenceBackend, InferenceError};
use crate::models::inference::{normalize_ext, InferenceRequest, InferenceResult};

/// Client for an HTTP inference service exposing `POST /infer`.
pub struct RemoteHttpBackend {
    http: Client,
    url: String,
}

/// Response body of the inference service. Every field is optional on the
/// wire; required ones are checked after decoding.
#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    boxed_image_base64: Option<String>,
    #[serde(default)]
    boxed_image_ext: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    json_text: Option<String>,
    #[serde(default)]
    json: Option<serde_json::Value>,
    #[serde(default)]
    feedback_applied: Option<bool>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl RemoteHttpBackend {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl InferenceBackend for RemoteHttpBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResult, InferenceError> {
        request
            .validate()
            .map_err(|e| InferenceError::InvalidRequest(e.to_string()))?;

        let file = multipart::Part::bytes(request.image_bytes.clone())
            .file_name(request.filename.clone())
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new()
            .part("file", file)
            .text("sensitivity", format!("{:.2}", request.sensitivity))
            .text("feedback_json", request.feedback_json.clone());

        tracing::info!(
            image_id = request.image_id,
            url = %self.url,
            sensitivity = request.sensitivity,
            "Calling remote inference service"
        );

        let response = self.http.post(&self.url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: InferResponse = response.json().await?;
        let result = decode_response(body)?;

        tracing::debug!(
            image_id = request.image_id,
            label = %result.label,
            ext = %result.boxed_image_ext,
            "Remote inference succeeded"
        );
        Ok(result)
    }
}

fn decode_response(body: InferResponse) -> Result<InferenceResult, InferenceError> {
    match body.error {
        None | Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::String(msg)) => return Err(InferenceError::Remote(msg)),
        Some(other) => return Err(InferenceError::Remote(other.to_string())),
    }

    let encoded = body
        .boxed_image_base64
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| InferenceError::MissingOutput("boxed_image_base64".into()))?;
    let boxed_image = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| InferenceError::Decode(e.to_string()))?;
    image::guess_format(&boxed_image)
        .map_err(|e| InferenceError::Decode(format!("not a recognized image: {e}")))?;

    let json_text = match (body.json_text, body.json) {
        (Some(text), _) if !text.trim().is_empty() => text,
        (_, Some(value)) if !value.is_null() => serde_json::to_string(&value)?,
        _ => return Err(InferenceError::MissingOutput("json_text or json".into())),
    };

    if let Some(applied) = body.feedback_applied {
        tracing::debug!(feedback_applied = applied, "Inference service feedback flag");
    }

    Ok(InferenceResult {
        label: body
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        boxed_image,
        boxed_image_ext: normalize_ext(body.boxed_image_ext.as_deref()),
        json_text,
    })
}
