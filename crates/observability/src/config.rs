use std::path::Path;

use serde::{Deserialize, Serialize};

/// Logging settings.
///
/// Rotation fields (`max_size_mb`, `max_backups`, `max_age_days`, `compress`)
/// are carried for the external rotation tooling that manages `filename`;
/// the process itself only ever appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `rolegate_api=debug,info`.
    pub level: String,
    pub filename: Option<String>,
    pub max_size_mb: u64,
    pub max_backups: u32,
    pub max_age_days: u32,
    pub compress: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filename: None,
            max_size_mb: 10,
            max_backups: 5,
            max_age_days: 30,
            compress: false,
        }
    }
}

impl LogConfig {
    /// Log file path, when a non-blank `filename` is configured.
    pub fn file_path(&self) -> Option<&Path> {
        self.filename
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(Path::new)
    }
}
