//! Integration tests for the `stepwise` binary.
//!
//! Each test runs the built binary against the JSON lambdas in `tests/fixtures`.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> String {
    fixtures_dir().join(name).to_string_lossy().into_owned()
}

fn stepwise(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stepwise"))
        .args(["--color", "never"])
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to launch stepwise")
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// check
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_check_valid_files() {
    let output = stepwise(&[
        "check",
        &fixture("sequential.json"),
        &fixture("switch.json"),
        &fixture("counter.json"),
    ]);
    assert!(output.status.success(), "{:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OK"));
    assert!(stdout.contains("3 file(s) checked"));
    assert!(stdout.contains("(generator, 4 suspend point(s)"));
}

#[test]
fn test_check_reports_misplaced_yield() {
    let output = stepwise(&["check", &fixture("misplaced_yield.json")]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FAIL"));
    assert!(stdout.contains("is not supported in an async lambda"), "{}", stdout);
}

#[test]
fn test_check_missing_file() {
    let output = stepwise(&["check", &fixture("nope.json")]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("failed to read"));
}

// ────────────────────────────────────────────────────────────────────────────
// lower
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_lower_prints_both_forms() {
    let output = stepwise(&["lower", &fixture("sequential.json")]);
    assert!(output.status.success(), "{:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("== state graph =="));
    assert!(stdout.contains("== linear =="));
    assert!(stdout.contains("ST_0000"));
    assert!(stdout.contains("async fn sequential(b)"));
}

#[test]
fn test_lower_graph_only() {
    let output = stepwise(&["lower", "--graph", "--unoptimized", &fixture("switch.json")]);
    assert!(output.status.success(), "{:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("== state graph =="));
    assert!(!stdout.contains("== linear =="));
}

// ────────────────────────────────────────────────────────────────────────────
// run
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_sequential_awaits() {
    for mode in [&[][..], &["--interpret"][..]] {
        let mut args = vec!["run", "--arg", "true"];
        args.extend_from_slice(mode);
        let path = fixture("sequential.json");
        args.push(&path);
        let output = stepwise(&args);
        assert!(output.status.success(), "{:?}", output);
        assert_eq!(stdout_lines(&output), vec!["20"]);
    }

    let output = stepwise(&["run", "--arg", "false", &fixture("sequential.json")]);
    assert_eq!(stdout_lines(&output), vec!["10"]);
}

#[test]
fn test_run_switch_case() {
    let output = stepwise(&["run", "--arg", "1", &fixture("switch.json")]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(stdout_lines(&output), vec!["42"]);

    let output = stepwise(&["run", "--interpret", "--arg", "5", &fixture("switch.json")]);
    assert_eq!(stdout_lines(&output), vec!["0"]);
}

#[test]
fn test_run_generator_prints_each_value() {
    let output = stepwise(&["run", &fixture("counter.json")]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(stdout_lines(&output), vec!["1", "2", "3"]);
}

#[test]
fn test_run_catch_and_finally() {
    let output = stepwise(&["run", &fixture("guarded.json")]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(stdout_lines(&output), vec!["caught", "cleanup", "7"]);
}

#[test]
fn test_run_wrong_arity_fails() {
    let output = stepwise(&["run", &fixture("sequential.json")]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("expected 1 argument(s), got 0"));
}

// ────────────────────────────────────────────────────────────────────────────
// config
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_step_limit() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[engine]\nstep_limit = 1").unwrap();
    let config_path = config.path().to_string_lossy().into_owned();

    let output = stepwise(&[
        "--config",
        &config_path,
        "run",
        "--arg",
        "true",
        &fixture("sequential.json"),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("step limit of 1 exceeded"));
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[engine]\noptimize = \"yes\"").unwrap();
    let config_path = config.path().to_string_lossy().into_owned();

    let output = stepwise(&["--config", &config_path, "check", &fixture("counter.json")]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid config"));
}
