#![allow(clippy::result_large_err)]

use super::StepLineConfig;
use crate::core::error::AppError;
use crate::core::types::{ErrorCategory, OutputFormat};
use std::env;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/stepline.toml)
    /// Environment variables override config file values
    pub fn load_from_workspace(workspace_path: &Path) -> Result<StepLineConfig, AppError> {
        Self::load(&workspace_path.join("stepline.toml"))
    }

    /// Load an explicit file (or defaults when it does not exist), then apply env overrides
    pub fn load(config_path: &Path) -> Result<StepLineConfig, AppError> {
        let mut config = Self::load_from_file(config_path)?.unwrap_or_default();
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<StepLineConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: StepLineConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ConfigError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
        })?;

        Ok(Some(config))
    }

    /// Environment variables take precedence over config file values;
    /// unparseable values are ignored
    fn apply_env_overrides(config: &mut StepLineConfig) {
        // API overrides
        if let Ok(url) = env::var("STEPLINE_API_URL") {
            config.api.base_url = url;
        }

        if let Ok(token) = env::var("STEPLINE_API_TOKEN") {
            config.api.token = Some(token);
        }

        if let Some(timeout) = parsed::<u64>("STEPLINE_API_TIMEOUT_SECS") {
            config.api.timeout_secs = timeout;
        }

        // Session overrides
        if let Ok(checkpoint) = env::var("STEPLINE_SESSION_ID") {
            if !checkpoint.trim().is_empty() {
                config.session.checkpoint_override = Some(checkpoint.trim().to_string());
            }
        }

        if let Ok(file) = env::var("STEPLINE_SESSION_FILE") {
            config.session.file = PathBuf::from(file);
        }

        if let Ok(format) = env::var("STEPLINE_OUTPUT_FORMAT") {
            match format.parse::<OutputFormat>() {
                Ok(format) => config.output.format = format,
                Err(err) => tracing::warn!("ignoring STEPLINE_OUTPUT_FORMAT: {}", err),
            }
        }

        // Retry overrides
        if let Some(attempts) = parsed::<u32>("STEPLINE_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts;
        }

        if let Some(backoff) = parsed::<u64>("STEPLINE_RETRY_BACKOFF_MS") {
            config.retry.backoff_ms = backoff;
        }

        // Detection overrides
        if let Some(confidence) = parsed::<f64>("STEPLINE_DETECTION_MIN_CONFIDENCE") {
            config.detection.min_confidence = confidence;
        }

        if let Some(epsilon) = parsed::<f64>("STEPLINE_DETECTION_EPSILON") {
            config.detection.ambiguity_epsilon = epsilon;
        }
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "STEPLINE_API_URL - Override the step API base URL",
            "STEPLINE_API_TOKEN - Bearer token sent to the step API",
            "STEPLINE_API_TIMEOUT_SECS - Override the request timeout (default: 30)",
            "STEPLINE_SESSION_ID - Checkpoint to append to for this process only (not persisted)",
            "STEPLINE_SESSION_FILE - Override the session file (default: .stepline/session.json)",
            "STEPLINE_OUTPUT_FORMAT - Default output format (text/json)",
            "STEPLINE_RETRY_MAX_ATTEMPTS - Override retry attempts for idempotent steps (default: 4)",
            "STEPLINE_RETRY_BACKOFF_MS - Override the initial retry backoff (default: 1000)",
            "STEPLINE_DETECTION_MIN_CONFIDENCE - Override the minimum detection confidence (default: 0.5)",
            "STEPLINE_DETECTION_EPSILON - Override the ambiguity margin (default: 0.1)",
        ]
    }

    /// Validate configuration values
    pub fn validate_config(config: &StepLineConfig) -> Result<(), AppError> {
        if config.api.base_url.trim().is_empty() {
            return Err(invalid("API base URL cannot be empty"));
        }

        if url::Url::parse(&config.api.base_url).is_err() {
            return Err(invalid(&format!(
                "API base URL '{}' is not a valid URL",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(invalid("API timeout must be at least one second"));
        }

        if config.retry.max_attempts == 0 {
            return Err(invalid("Retry max_attempts must be at least 1"));
        }

        if config.retry.backoff_multiplier < 1.0 {
            return Err(invalid("Retry backoff_multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&config.detection.min_confidence) {
            return Err(invalid("Detection min_confidence must be between 0.0 and 1.0"));
        }

        if !(0.0..=1.0).contains(&config.detection.ambiguity_epsilon) {
            return Err(invalid("Detection ambiguity_epsilon must be between 0.0 and 1.0"));
        }

        if config.session.file.as_os_str().is_empty() {
            return Err(invalid("Session file path cannot be empty"));
        }

        Ok(())
    }
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse::<T>().ok())
}

fn invalid(message: &str) -> AppError {
    AppError::new(ErrorCategory::ConfigError, message.to_string()).with_code("YAML-CFG-001")
}
