use serde::{Deserialize, Serialize};

/// Inspection image owned by the maintenance-record system.
///
/// Only `file_path` is mutated here: a completed analysis points it at the
/// boxed artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct ImageRecord {
    pub id: i64,
    pub inspection_id: i64,
    pub file_path: String,
}

impl ImageRecord {
    /// Path of the image relative to the uploads root.
    ///
    /// Stored paths are web paths such as `/uploads/t1/a.jpg` or
    /// `/analysis/a_boxed.jpg`; both prefixes are stripped here.
    pub fn relative_path(&self) -> &str {
        let path = self.file_path.as_str();
        let path = path.strip_prefix("/uploads/").unwrap_or(path);
        path.trim_start_matches('/')
    }

    /// File name component of the stored path.
    pub fn file_name(&self) -> &str {
        let rel = self.relative_path();
        rel.rsplit(['/', '\\']).next().unwrap_or(rel)
    }
}
