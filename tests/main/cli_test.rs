//! CLI contract tests.

use std::path::Path;

use assert_cmd::Command;

fn btrescue(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("btrescue").expect("binary should be built");
    cmd.env("HOME", home).env("RUST_LOG", "info");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("btrescue.toml");
    std::fs::write(&path, body).expect("should write config");
    path
}

#[test]
fn help_lists_subcommands() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = btrescue(tmp.path()).arg("--help").output().expect("should run");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("start"));
    assert!(stdout.contains("run"));
}

#[test]
fn run_rejects_unknown_mode() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    btrescue(tmp.path())
        .args(["run", "--mode", "repair"])
        .assert()
        .failure();
}

#[test]
fn wait_mode_reports_detection_without_rescuing() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = write_config(
        tmp.path(),
        r#"
rescue = true

[detection]
log_command = ["sh", "-c", "printf '[123.456] Bluetooth: hci0: hardware error 0x00\\n'"]
"#,
    );

    let output = btrescue(tmp.path())
        .args(["run", "--mode", "wait", "--config"])
        .arg(&config)
        .timeout(std::time::Duration::from_secs(10))
        .output()
        .expect("should run");
    assert!(output.status.success(), "{output:?}");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("dmesg tailer found hardware error"));
    assert!(stderr.contains("not rescuing because rescue=false in config"));
}

#[test]
fn run_reports_missing_config_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = btrescue(tmp.path())
        .args(["run", "--mode", "wait", "--config"])
        .arg(tmp.path().join("absent.toml"))
        .output()
        .expect("should run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("absent.toml"));
}

#[test]
fn start_requires_rescue_flag() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = write_config(tmp.path(), "[recovery]\nmax_attempts = 2\n");

    let output = btrescue(tmp.path())
        .args(["start", "--config"])
        .arg(&config)
        .timeout(std::time::Duration::from_secs(10))
        .output()
        .expect("should run");

    assert!(!output.status.success());
    assert!(tmp.path().join(".btrescue/logs").exists());
}
