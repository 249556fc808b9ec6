use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

fn reloadg() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("reloadg"))
}

#[test]
fn version_flag_prints_version() {
    reloadg()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn clean_child_exit_exits_zero() {
    reloadg()
        .args(["--command", "true", "--config", "/nonexistent/reloadg/app.conf"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success();
}

#[test]
fn trailing_arguments_are_passed_to_child() {
    reloadg()
        .args([
            "--command",
            "sh",
            "--config",
            "/nonexistent/reloadg/app.conf",
            "--",
            "-c",
            "echo from-child-$0",
        ])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stdout(contains("from-child-sh"));
}

#[test]
fn failing_child_exits_non_zero() {
    reloadg()
        .args(["--command", "false", "--config", "/nonexistent/reloadg/app.conf"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .failure();
}

#[test]
fn missing_executable_exits_non_zero() {
    reloadg()
        .args([
            "--command",
            "/nonexistent/reloadg-child",
            "--config",
            "/nonexistent/reloadg/app.conf",
        ])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .failure()
        .stdout(contains("Failed to start process"));
}

#[test]
fn settings_file_supplies_command() {
    let temp = tempdir().unwrap();
    let settings = temp.path().join("reloadg.yaml");
    fs::write(
        &settings,
        "command: \"true\"\nwatch: /nonexistent/reloadg/app.conf\ntimings:\n  stop_timeout: 2s\n",
    )
    .unwrap();

    reloadg()
        .arg("--settings")
        .arg(&settings)
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success();
}

#[test]
fn invalid_settings_file_exits_non_zero() {
    let temp = tempdir().unwrap();
    let settings = temp.path().join("reloadg.yaml");
    fs::write(&settings, "unknown_key: 1\n").unwrap();

    reloadg()
        .arg("--settings")
        .arg(&settings)
        .assert()
        .failure();
}
