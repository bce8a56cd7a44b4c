//! CLI argument validation tests for miniplexd.
//!
//! These only exercise paths that exit before any socket is opened (`--help`,
//! `--version`, and invalid configurations caught by `Config::from_cli`) so
//! they never block waiting for a shutdown signal.

use assert_cmd::Command;
use predicates::prelude::*;

fn miniplexd_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_miniplexd"))
}

#[test]
fn test_help() {
    miniplexd_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("UDP datagram multiplexer"));
}

#[test]
fn test_version() {
    miniplexd_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("miniplexd"));
}

#[test]
fn test_no_mode_flag_fails() {
    miniplexd_cmd()
        .args(["--local-port", "9000"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("exactly one of"));
}

#[test]
fn test_conflicting_mode_flags_fail() {
    miniplexd_cmd()
        .args(["--hub", "--trunk", "--local-port", "9000"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_trunk_mode_without_trunk_address_fails() {
    miniplexd_cmd()
        .args(["--trunk", "--local-port", "9000"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("trunk"));
}

#[test]
fn test_prune_mode_rejects_branch_flags() {
    miniplexd_cmd()
        .args([
            "--prune",
            "--local-port",
            "9000",
            "--trunk-ip",
            "10.0.0.9",
            "--trunk-port",
            "7000",
            "--branch-ip",
            "10.0.0.1",
            "--branch-port",
            "5001",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not allowed in prune mode"));
}

#[test]
fn test_switch_mode_requires_byte_code() {
    miniplexd_cmd()
        .args(["--switch", "--local-port", "9000"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--byte-code"));
}

#[test]
fn test_unknown_log_level_fails() {
    miniplexd_cmd()
        .args(["--hub", "--local-port", "9000", "--console-level", "verbose"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid log level"));
}

#[test]
fn test_switch_mode_with_missing_byte_code_file_fails() {
    // Passes CLI validation (a path is given) but fails during construction
    // when the file can't be read -- still a non-zero exit before any socket
    // work happens. Points the log file into the OS temp dir so the test
    // doesn't leave a stray log file behind in the workspace.
    let log_path = std::env::temp_dir().join(format!("miniplexd-test-{}.log", std::process::id()));
    miniplexd_cmd()
        .args([
            "--switch",
            "--local-port",
            "9000",
            "--byte-code",
            "/nonexistent/path/to/bytecode.bin",
            "--log-file",
        ])
        .arg(&log_path)
        .assert()
        .failure()
        .code(1);
    let _ = std::fs::remove_file(&log_path);
}
