use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BIN: &str = "stepline";

const LOGIN: &str = "test: Login\ndo:\n  - nav: https://x.test\n  - c: Login\n  - ch: Welcome\n";

fn stepline(workspace: &Path) -> Command {
    let mut cmd = Command::cargo_bin(BIN).expect("binary should build");
    for var in [
        "STEPLINE_API_URL",
        "STEPLINE_API_TOKEN",
        "STEPLINE_SESSION_ID",
        "STEPLINE_SESSION_FILE",
        "STEPLINE_OUTPUT_FORMAT",
        "OTEL_EXPORTER_OTLP_ENDPOINT",
    ] {
        cmd.env_remove(var);
    }
    cmd.current_dir(workspace).arg("--workspace").arg(workspace);
    cmd
}

fn workspace_with(name: &str, content: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(name), content).unwrap();
    dir
}

fn session_json(workspace: &Path) -> Value {
    let output = stepline(workspace)
        .args(["session", "show", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn detect_reports_the_dialect_as_json() {
    let dir = workspace_with("login.yaml", LOGIN);
    stepline(dir.path())
        .args(["yaml", "detect", "login.yaml", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dialect\": \"compact\""))
        .stdout(predicate::str::contains("\"accepted\": true"));
}

#[test]
fn validate_exits_with_two_on_errors() {
    let dir = workspace_with("broken.yaml", "test: Broken\ndo:\n  - clik: \"#go\"\n");
    stepline(dir.path())
        .args(["yaml", "validate", "broken.yaml"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("YAML-SCH-003"))
        .stdout(predicate::str::contains("Did you mean 'click'?"));
}

#[test]
fn strict_validation_fails_on_warnings() {
    let dir = workspace_with("login.yaml", LOGIN);
    stepline(dir.path())
        .args(["yaml", "validate", "login.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("YAML-BP-002"));
    stepline(dir.path())
        .args(["yaml", "validate", "login.yaml", "--strict"])
        .assert()
        .code(2);
}

#[test]
fn compile_lists_positioned_instructions() {
    let dir = workspace_with("login.yaml", LOGIN);
    stepline(dir.path())
        .args(["yaml", "compile", "login.yaml", "--target-checkpoint", "1680"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1680#1"))
        .stdout(predicate::str::contains("navigate \"https://x.test\""))
        .stdout(predicate::str::contains("1680#3"))
        .stdout(predicate::str::contains("assert-exists \"Welcome\""));
}

#[test]
fn compile_rejects_undeclared_variables() {
    let dir = workspace_with(
        "broken.yaml",
        "name: Broken\nsteps:\n  - write: {selector: \"#u\", text: \"{{username}}\"}\n",
    );
    stepline(dir.path())
        .args(["yaml", "compile", "broken.yaml", "--format", "json"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("YAML-VAL-001"))
        .stdout(predicate::str::contains("username"));
}

#[test]
fn session_set_show_and_reset() {
    let dir = TempDir::new().unwrap();
    stepline(dir.path())
        .args(["session", "set", "--checkpoint", "1680", "--position", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("checkpoint:     1680"))
        .stdout(predicate::str::contains("next position:  4"));

    let session = session_json(dir.path());
    assert_eq!(session["current_checkpoint_id"], json!("1680"));
    assert_eq!(session["next_position"], json!(4));
    assert!(dir.path().join(".stepline/session.json").exists());

    stepline(dir.path())
        .args(["session", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(not set)"));
}

#[test]
fn dry_run_prints_payloads_without_touching_the_session() {
    let dir = workspace_with("login.yaml", LOGIN);
    stepline(dir.path())
        .args(["session", "set", "--checkpoint", "1680", "--position", "2"])
        .assert()
        .success();

    stepline(dir.path())
        .args(["yaml", "run", "login.yaml", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(dry run)"))
        .stdout(predicate::str::contains("1680#2"))
        .stdout(predicate::str::contains("1680#4"));

    let session = session_json(dir.path());
    assert_eq!(session["next_position"], json!(2));
}

#[test]
fn run_without_a_checkpoint_fails() {
    let dir = workspace_with("login.yaml", LOGIN);
    stepline(dir.path())
        .args(["yaml", "run", "login.yaml", "--dry-run"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("no checkpoint is set"));
}

#[test]
fn checkpoint_flag_is_not_persisted() {
    let dir = workspace_with("login.yaml", LOGIN);
    stepline(dir.path())
        .args(["yaml", "run", "login.yaml", "--checkpoint", "77", "--dry-run", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"checkpoint_id\": \"77\""));
    assert!(!dir.path().join(".stepline/session.json").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn run_appends_steps_and_advances_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/teststeps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"item": {"id": 501}})))
        .expect(3)
        .mount(&server)
        .await;

    let dir = workspace_with("login.yaml", LOGIN);
    stepline(dir.path())
        .args(["session", "set", "--checkpoint", "1680"])
        .assert()
        .success();

    stepline(dir.path())
        .env("STEPLINE_API_URL", format!("{}/api", server.uri()))
        .args(["yaml", "run", "login.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 succeeded"));

    let session = session_json(dir.path());
    assert_eq!(session["current_checkpoint_id"], json!("1680"));
    assert_eq!(session["next_position"], json!(4));
}

#[test]
fn convert_writes_the_target_dialect() {
    let dir = workspace_with("login.yaml", LOGIN);
    stepline(dir.path())
        .args([
            "yaml",
            "convert",
            "--from",
            "login.yaml",
            "--to-format",
            "simplified",
            "--output",
            "out/login.simplified.yaml",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("-> "));

    let written = fs::read_to_string(dir.path().join("out/login.simplified.yaml")).unwrap();
    assert!(written.starts_with("name: Login"), "{}", written);

    stepline(dir.path())
        .args(["yaml", "detect", "out/login.simplified.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("simplified"));
}

#[test]
fn missing_files_fail() {
    let dir = TempDir::new().unwrap();
    stepline(dir.path())
        .args(["yaml", "validate", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.yaml"));
}

const FIRST: &str = "test: First\ndo:\n  - c: One\n  - c: Two\n";
const SECOND: &str = "test: Second\ndo:\n  - c: Three\n  - c: Four\n";

fn suite() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("suite")).unwrap();
    fs::write(dir.path().join("suite/a.yaml"), FIRST).unwrap();
    fs::write(dir.path().join("suite/b.yaml"), SECOND).unwrap();
    dir
}

fn request_slots(output: &[u8]) -> Vec<(String, u64)> {
    let value: Value = serde_json::from_slice(output).unwrap();
    value["requests"]
        .as_array()
        .unwrap()
        .iter()
        .map(|request| {
            (
                request["checkpoint_id"].as_str().unwrap().to_string(),
                request["position"].as_u64().unwrap(),
            )
        })
        .collect()
}

#[test]
fn files_on_one_checkpoint_continue_each_others_positions() {
    let dir = suite();
    stepline(dir.path())
        .args(["session", "set", "--checkpoint", "1680"])
        .assert()
        .success();

    let output = stepline(dir.path())
        .args(["yaml", "run", "suite/a.yaml", "suite/b.yaml", "--dry-run", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let slots = request_slots(&output.stdout);
    assert_eq!(
        slots,
        vec![
            ("1680".to_string(), 1),
            ("1680".to_string(), 2),
            ("1680".to_string(), 3),
            ("1680".to_string(), 4),
        ]
    );
    assert_eq!(session_json(dir.path())["next_position"], json!(1));
}

#[test]
fn wildcard_arguments_expand_in_name_order() {
    let dir = suite();
    fs::write(dir.path().join("suite/notes.md"), "not a test").unwrap();
    stepline(dir.path())
        .args(["yaml", "run", "suite/*.yaml", "--checkpoint", "9", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("suite/a.yaml, suite/b.yaml (dry run)"))
        .stdout(predicate::str::contains("9#4"));

    stepline(dir.path())
        .args(["yaml", "run", "suite/*.json", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no files match"));
}

#[tokio::test(flavor = "multi_thread")]
async fn multi_file_runs_persist_the_shared_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/teststeps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"item": {"id": 7}})))
        .expect(4)
        .mount(&server)
        .await;

    let dir = suite();
    stepline(dir.path())
        .args(["session", "set", "--checkpoint", "1680", "--position", "3"])
        .assert()
        .success();

    stepline(dir.path())
        .env("STEPLINE_API_URL", format!("{}/api", server.uri()))
        .args(["yaml", "run", "suite/a.yaml", "suite/b.yaml", "--report", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1680#6"))
        .stdout(predicate::str::contains("report saved to"));

    assert_eq!(session_json(dir.path())["next_position"], json!(7));
    let report: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("test-results.json")).unwrap())
            .unwrap();
    assert_eq!(report["passed"], json!(2));
    assert_eq!(report["documents"][1]["name"], json!("Second"));
}

#[test]
fn text_reports_are_written_for_dry_runs() {
    let dir = suite();
    stepline(dir.path())
        .args(["yaml", "run", "suite/a.yaml", "--checkpoint", "5", "--dry-run", "--report", "text"])
        .assert()
        .success();
    let text = fs::read_to_string(dir.path().join("test-results.txt")).unwrap();
    assert!(text.contains("=== Stepline Test Results ==="), "{}", text);
    assert!(text.contains("--- First (suite/a.yaml) ---"), "{}", text);
}

#[test]
fn generate_prints_a_document_that_validates() {
    let dir = TempDir::new().unwrap();
    stepline(dir.path())
        .args(["yaml", "generate", "Test the login page", "--strict", "--output", "gen/login.yaml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("using template: login"));

    let written = fs::read_to_string(dir.path().join("gen/login.yaml")).unwrap();
    assert!(written.starts_with("test: \"Test the login page\"\n"), "{}", written);
    stepline(dir.path())
        .args(["yaml", "validate", "gen/login.yaml", "--strict"])
        .assert()
        .success();

    stepline(dir.path())
        .args(["yaml", "generate", "anything", "--template", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown template 'nope'"));
}
