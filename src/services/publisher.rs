use std::path::{Path, PathBuf};

use crate::models::inference::{base_name, InferenceResult};

const ANALYSIS_DIR: &str = "analysis";

/// Where a job's artifacts ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifacts {
    pub boxed_image_file: PathBuf,
    pub json_file: PathBuf,
    /// Web path of the boxed image, e.g. `/analysis/t1_boxed.jpg`.
    pub boxed_image_path: String,
    pub json_path: String,
}

/// Writes inference artifacts under `<uploads_root>/analysis/`.
#[derive(Debug, Clone)]
pub struct ArtifactPublisher {
    uploads_root: PathBuf,
}

impl ArtifactPublisher {
    pub fn new(uploads_root: impl Into<PathBuf>) -> Self {
        Self {
            uploads_root: uploads_root.into(),
        }
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads_root
    }

    /// Resolve a stored image path to a file under the uploads root.
    pub fn original_path(&self, relative: &str) -> PathBuf {
        self.uploads_root.join(relative)
    }

    /// Persist the boxed image and result JSON for `original_filename`.
    ///
    /// Existing artifacts with the same names are overwritten. The original
    /// image is never touched.
    pub async fn publish(
        &self,
        original_filename: &str,
        result: &InferenceResult,
    ) -> Result<PublishedArtifacts, PublishError> {
        let base = base_name(original_filename);
        if base.is_empty() {
            return Err(PublishError::InvalidName(original_filename.to_string()));
        }

        let analysis_dir = self.uploads_root.join(ANALYSIS_DIR);
        tokio::fs::create_dir_all(&analysis_dir)
            .await
            .map_err(|e| PublishError::Io(analysis_dir.clone(), e))?;

        let boxed_name = format!("{base}_boxed{}", result.boxed_image_ext);
        let json_name = format!("{base}.json");

        let boxed_image_file = analysis_dir.join(&boxed_name);
        tokio::fs::write(&boxed_image_file, &result.boxed_image)
            .await
            .map_err(|e| PublishError::Io(boxed_image_file.clone(), e))?;

        let json_file = analysis_dir.join(&json_name);
        tokio::fs::write(&json_file, result.json_text.as_bytes())
            .await
            .map_err(|e| PublishError::Io(json_file.clone(), e))?;

        tracing::debug!(
            boxed = %boxed_image_file.display(),
            json = %json_file.display(),
            "Published analysis artifacts"
        );

        Ok(PublishedArtifacts {
            boxed_image_file,
            json_file,
            boxed_image_path: format!("/{ANALYSIS_DIR}/{boxed_name}"),
            json_path: format!("/{ANALYSIS_DIR}/{json_name}"),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to write {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Cannot derive artifact name from {0:?}")]
    InvalidName(String),
}
