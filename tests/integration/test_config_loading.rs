use insta::assert_debug_snapshot;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use stepline::core::config::ConfigLoader;
use stepline::core::types::{ErrorCategory, OutputFormat};
use tempfile::TempDir;

fn clear_stepline_env() {
    for v in &[
        "STEPLINE_API_URL",
        "STEPLINE_API_TOKEN",
        "STEPLINE_API_TIMEOUT_SECS",
        "STEPLINE_SESSION_ID",
        "STEPLINE_SESSION_FILE",
        "STEPLINE_OUTPUT_FORMAT",
        "STEPLINE_RETRY_MAX_ATTEMPTS",
        "STEPLINE_RETRY_BACKOFF_MS",
        "STEPLINE_DETECTION_MIN_CONFIDENCE",
        "STEPLINE_DETECTION_EPSILON",
    ] {
        env::remove_var(v);
    }
}

/// Test integration of config loading with every section present
#[test]
#[serial]
fn test_config_loading_integration() {
    clear_stepline_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();

    let config_content = r#"
[api]
base_url = "https://steps.example.test/api"
timeout_secs = 12

[retry]
max_attempts = 3
backoff_ms = 250
backoff_multiplier = 1.5
max_backoff_ms = 2000
jitter_ms = 0

[detection]
min_confidence = 0.6
ambiguity_epsilon = 0.05

[session]
file = ".custom/session.json"
auto_increment = false

[output]
format = "json"
"#;
    fs::write(workspace_path.join("stepline.toml"), config_content).unwrap();

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();

    assert_debug_snapshot!(config, @r###"
    StepLineConfig {
        api: ApiConfig {
            base_url: "https://steps.example.test/api",
            token: None,
            timeout_secs: 12,
        },
        retry: RetrySettings {
            max_attempts: 3,
            backoff_ms: 250,
            backoff_multiplier: 1.5,
            max_backoff_ms: 2000,
            jitter_ms: 0,
        },
        detection: DetectionConfig {
            min_confidence: 0.6,
            ambiguity_epsilon: 0.05,
        },
        session: SessionConfig {
            file: ".custom/session.json",
            auto_increment: false,
            checkpoint_override: None,
        },
        output: OutputConfig {
            format: Json,
        },
    }
    "###);
    assert!(ConfigLoader::validate_config(&config).is_ok());
    assert_eq!(
        config.session.resolve_file(workspace_path),
        workspace_path.join(".custom/session.json")
    );
    let detector = config.detection.detector_config();
    assert_eq!(detector.min_confidence, 0.6);
    assert_eq!(detector.ambiguity_epsilon, 0.05);
}

/// Test environment variable precedence over config file
#[test]
#[serial]
fn test_env_precedence_integration() {
    clear_stepline_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();

    fs::write(
        workspace_path.join("stepline.toml"),
        "[api]\nbase_url = \"https://file.test/api\"\ntimeout_secs = 10\n\n[output]\nformat = \"text\"\n",
    )
    .unwrap();

    env::set_var("STEPLINE_API_URL", "https://env.test/api");
    env::set_var("STEPLINE_API_TOKEN", "env-token");
    env::set_var("STEPLINE_API_TIMEOUT_SECS", "45");
    env::set_var("STEPLINE_SESSION_ID", " 1680 ");
    env::set_var("STEPLINE_SESSION_FILE", "/tmp/stepline-session.json");
    env::set_var("STEPLINE_OUTPUT_FORMAT", "json");
    env::set_var("STEPLINE_RETRY_MAX_ATTEMPTS", "7");
    env::set_var("STEPLINE_RETRY_BACKOFF_MS", "50");
    env::set_var("STEPLINE_DETECTION_MIN_CONFIDENCE", "0.7");
    env::set_var("STEPLINE_DETECTION_EPSILON", "0.2");

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();
    clear_stepline_env();

    assert_eq!(config.api.base_url, "https://env.test/api");
    assert_eq!(config.api.token.as_deref(), Some("env-token"));
    assert_eq!(config.api.timeout_secs, 45);
    assert_eq!(config.session.checkpoint_override.as_deref(), Some("1680"));
    assert_eq!(
        config.session.resolve_file(workspace_path),
        PathBuf::from("/tmp/stepline-session.json")
    );
    assert_eq!(config.output.format, OutputFormat::Json);
    assert_eq!(config.retry.max_attempts, 7);
    assert_eq!(config.retry.backoff_ms, 50);
    assert_eq!(config.detection.min_confidence, 0.7);
    assert_eq!(config.detection.ambiguity_epsilon, 0.2);
}

/// Unparseable numbers keep the file value
#[test]
#[serial]
fn test_invalid_env_values_are_ignored() {
    clear_stepline_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("stepline.toml"),
        "[retry]\nmax_attempts = 5\n",
    )
    .unwrap();

    env::set_var("STEPLINE_RETRY_MAX_ATTEMPTS", "many");
    env::set_var("STEPLINE_OUTPUT_FORMAT", "yaml");
    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    clear_stepline_env();

    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.output.format, OutputFormat::Text);
}

/// Test that invalid values are rejected by validation
#[test]
#[serial]
fn test_validation_rejects_bad_values() {
    clear_stepline_env();
    let cases = [
        "[api]\nbase_url = \"not a url\"\n",
        "[api]\ntimeout_secs = 0\n",
        "[retry]\nmax_attempts = 0\n",
        "[retry]\nbackoff_multiplier = 0.5\n",
        "[detection]\nmin_confidence = 1.5\n",
        "[detection]\nambiguity_epsilon = -0.1\n",
    ];
    for content in cases {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("stepline.toml"), content).unwrap();
        let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
        let err = ConfigLoader::validate_config(&config).unwrap_err();
        assert_eq!(err.category, ErrorCategory::ConfigError, "{}", content);
        assert_eq!(err.code, "YAML-CFG-001");
    }
}

/// Unknown output formats in the file are a parse error
#[test]
#[serial]
fn test_bad_file_values_fail_to_parse() {
    clear_stepline_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("stepline.toml"),
        "[output]\nformat = \"yaml\"\n",
    )
    .unwrap();

    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ConfigError);
    assert!(err.message.contains("stepline.toml"));
}
