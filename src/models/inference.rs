use garde::Validate;
use serde::{Deserialize, Serialize};

/// One call to an inference backend.
#[derive(Debug, Clone, Validate)]
pub struct InferenceRequest {
    #[garde(length(min = 1))]
    pub image_bytes: Vec<u8>,

    #[garde(length(min = 1, max = 255))]
    pub filename: String,

    #[garde(range(min = 0.0, max = 1.0))]
    pub sensitivity: f64,

    #[garde(skip)]
    pub feedback_json: String,

    /// Used to name per-job scratch space.
    #[garde(skip)]
    pub image_id: i64,
}

impl InferenceRequest {
    /// File name without its final extension.
    pub fn base_name(&self) -> &str {
        base_name(&self.filename)
    }
}

/// Artifacts returned by a successful inference.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub label: String,
    pub boxed_image: Vec<u8>,
    /// Extension of `boxed_image`, including the leading dot.
    pub boxed_image_ext: String,
    pub json_text: String,
}

/// A single finding inside the detection JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    #[serde(rename = "type", alias = "label", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Typed view of the detection JSON. Unknown fields are ignored; the raw
/// text is what gets persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionReport {
    pub label: String,
    #[serde(default, alias = "boxes", alias = "anomalies")]
    pub findings: Vec<Finding>,
}

impl DetectionReport {
    pub fn parse(json_text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_text)
    }
}

/// Strip directory components and the final extension from a file name.
pub fn base_name(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

/// Normalize an extension to carry a leading dot, defaulting to `.png`.
pub fn normalize_ext(ext: Option<&str>) -> String {
    match ext.map(str::trim) {
        None | Some("") => ".png".to_string(),
        Some(e) if e.starts_with('.') => e.to_string(),
        Some(e) => format!(".{e}"),
    }
}
