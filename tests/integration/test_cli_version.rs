use assert_cmd::Command;
use predicates::str::{contains, starts_with};

const BIN: &str = "stepline";

#[test]
fn version_flag_prints_crate_version() {
    let expected = format!("{BIN} {}", stepline::VERSION);

    Command::cargo_bin(BIN)
        .expect("binary should build")
        .arg("--version")
        .assert()
        .success()
        .stdout(starts_with(expected));
}

#[test]
fn help_output_includes_version_banner() {
    let version_banner = format!("{BIN} {}", stepline::VERSION);

    Command::cargo_bin(BIN)
        .expect("binary should build")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains(version_banner))
        .stdout(contains("COMMANDS:"))
        .stdout(contains("yaml"))
        .stdout(contains("session"));
}

#[test]
fn yaml_help_lists_every_subcommand() {
    let output = Command::cargo_bin(BIN)
        .expect("binary should build")
        .args(["yaml", "--help"])
        .output()
        .expect("should run successfully");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["detect", "validate", "compile", "run", "convert"] {
        assert!(stdout.contains(name), "missing {} in {}", name, stdout);
    }
}

#[test]
fn run_help_shows_examples() {
    Command::cargo_bin(BIN)
        .expect("binary should build")
        .args(["yaml", "run", "--help"])
        .assert()
        .success()
        .stdout(contains("--dry-run"))
        .stdout(contains("stepline yaml run tests/login.yaml"));
}

#[test]
fn run_requires_a_file() {
    Command::cargo_bin(BIN)
        .expect("binary should build")
        .args(["yaml", "run"])
        .assert()
        .failure();
}
