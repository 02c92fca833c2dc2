pub mod loader;

pub use loader::ConfigLoader;

use crate::core::types::OutputFormat;
use crate::core::yaml_layer::detector::DetectorConfig;
use crate::core::yaml_layer::executor::RetrySettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main stepline configuration loaded from stepline.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepLineConfig {
    /// Step API connection
    #[serde(default)]
    pub api: ApiConfig,

    /// Backoff for idempotent steps
    #[serde(default)]
    pub retry: RetrySettings,

    /// Dialect detection thresholds
    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Step API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token; usually supplied through STEPLINE_API_TOKEN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Minimum score gap between the two best dialects
    #[serde(default = "default_ambiguity_epsilon")]
    pub ambiguity_epsilon: f64,
}

impl DetectionConfig {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            min_confidence: self.min_confidence,
            ambiguity_epsilon: self.ambiguity_epsilon,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let defaults = DetectorConfig::default();
        Self {
            min_confidence: defaults.min_confidence,
            ambiguity_epsilon: defaults.ambiguity_epsilon,
        }
    }
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session file, relative to the workspace
    #[serde(default = "default_session_file")]
    pub file: PathBuf,

    #[serde(default = "default_auto_increment")]
    pub auto_increment: bool,

    /// Checkpoint forced for this process only; never written to the session file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_override: Option<String>,
}

impl SessionConfig {
    pub fn resolve_file(&self, workspace: &Path) -> PathBuf {
        if self.file.is_absolute() {
            self.file.clone()
        } else {
            workspace.join(&self.file)
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file: default_session_file(),
            auto_increment: default_auto_increment(),
            checkpoint_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

// Default functions
fn default_base_url() -> String {
    "https://api.stepline.dev/api".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_min_confidence() -> f64 {
    DetectorConfig::default().min_confidence
}

fn default_ambiguity_epsilon() -> f64 {
    DetectorConfig::default().ambiguity_epsilon
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".stepline/session.json")
}

fn default_auto_increment() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StepLineConfig::default();
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.detection.min_confidence, 0.5);
        assert!(config.session.auto_increment);
        assert_eq!(config.session.file, PathBuf::from(".stepline/session.json"));
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config: StepLineConfig = toml::from_str(
            r#"
[retry]
max_attempts = 2

[session]
auto_increment = false
"#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.backoff_ms, 1000);
        assert!(!config.session.auto_increment);
        assert_eq!(config.api.base_url, "https://api.stepline.dev/api");
    }

    #[test]
    fn test_session_file_is_relative_to_workspace() {
        let config = SessionConfig::default();
        assert_eq!(
            config.resolve_file(Path::new("/work")),
            PathBuf::from("/work/.stepline/session.json")
        );
    }
}
