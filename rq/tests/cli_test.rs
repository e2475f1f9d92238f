//! CLI tests for the `rq` binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `rq` isolated from the user's config and log directories
fn rq(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rq").expect("rq binary should build");
    cmd.current_dir(temp_dir.path())
        .env("XDG_DATA_HOME", temp_dir.path().join("data"))
        .env("XDG_CONFIG_HOME", temp_dir.path().join("config"))
        .env("HOME", temp_dir.path())
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_run_commands_from_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let jobs = temp_dir.path().join("jobs.txt");
    fs::write(&jobs, "# warmup\necho first\n\necho second\n").unwrap();

    rq(&temp_dir)
        .args(["run", jobs.to_str().unwrap(), "-n", "100", "-p", "1", "--margin-ms", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo first").and(predicate::str::contains("second")))
        .stdout(predicate::str::contains("warmup").not());
}

#[test]
fn test_run_commands_from_stdin_as_json() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    rq(&temp_dir)
        .args(["run", "-", "-n", "50", "--format", "json"])
        .write_stdin("echo from-stdin\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status":"ok""#))
        .stdout(predicate::str::contains("from-stdin"));
}

#[test]
fn test_failed_command_fails_run() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let jobs = temp_dir.path().join("jobs.txt");
    fs::write(&jobs, "true\nexit 4\n").unwrap();

    rq(&temp_dir)
        .args(["run", jobs.to_str().unwrap(), "-n", "100", "--margin-ms", "0"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("status 4"))
        .stderr(predicate::str::contains("1 of 2 commands failed"));
}

#[test]
fn test_empty_command_list() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    rq(&temp_dir)
        .args(["run"])
        .write_stdin("\n# nothing here\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("No commands to run"));
}

#[test]
fn test_config_prints_effective_settings() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = temp_dir.path().join("rq.yml");
    fs::write(&config, "rate:\n  no-requests: 7\nsafety-margin-ms: 20\n").unwrap();

    rq(&temp_dir)
        .args(["config", "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("no-requests: 7"))
        .stdout(predicate::str::contains("safety-margin-ms: 20"));
}

#[test]
fn test_project_local_config_is_picked_up() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join(".ratequeue.yml"), "runner:\n  shell: bash\n").unwrap();

    rq(&temp_dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("shell: bash"));
}

#[test]
fn test_missing_explicit_config_errors() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    rq(&temp_dir)
        .args(["config", "-c", "does-not-exist.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
