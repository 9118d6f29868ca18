use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

/// 2026-10-17T09:00:00Z
const T0: i64 = 1_792_227_600_000;

fn write_config(home: &Path, contents: &str) {
    fs::write(home.join("config.toml"), contents).unwrap();
}

fn kdb(home: &Path, now_ms: i64, args: &[&str]) -> assert_cmd::assert::Assert {
    cargo_bin_cmd!("kdb")
        .env("KDB_HOME", home)
        .env("KDB_NOW_MS", now_ms.to_string())
        .args(args)
        .assert()
}

#[test]
fn test_status_on_fresh_home_is_ready() {
    let dir = tempdir().unwrap();

    kdb(dir.path(), T0, &["quota", "status"])
        .success()
        .stdout(predicate::str::contains("used today: 0/5"))
        .stdout(predicate::str::contains("next request: 利用可能"));
}

#[test]
fn test_record_then_status_shows_countdown() {
    let dir = tempdir().unwrap();

    kdb(dir.path(), T0, &["quota", "record"])
        .success()
        .stdout(predicate::str::contains("Recorded request (1/5 today)"));

    assert!(dir.path().join("storage.json").exists());

    kdb(dir.path(), T0 + 55_000, &["quota", "status"])
        .success()
        .stdout(predicate::str::contains("used today: 1/5"))
        .stdout(predicate::str::contains("next request: 1分05秒"));
}

#[test]
fn test_check_without_api_key_bypasses_gate() {
    let dir = tempdir().unwrap();

    kdb(dir.path(), T0, &["quota", "record"]).success();
    kdb(dir.path(), T0 + 1000, &["quota", "check"])
        .success()
        .stdout(predicate::str::contains("rate limit not applied"));
}

#[test]
fn test_check_reports_cooldown() {
    let dir = tempdir().unwrap();
    write_config(dir.path(), "api_key = \"test-key\"\n");

    kdb(dir.path(), T0, &["quota", "check"])
        .success()
        .stdout(predicate::str::contains("allowed"));
    kdb(dir.path(), T0, &["quota", "record"]).success();

    kdb(dir.path(), T0 + 1000, &["quota", "check"])
        .success()
        .stdout(predicate::str::contains("1分59秒"));

    kdb(dir.path(), T0 + 120_000, &["quota", "check"])
        .success()
        .stdout(predicate::str::diff("allowed\n"));
}

#[test]
fn test_check_reports_daily_limit_and_next_day_reset() {
    let dir = tempdir().unwrap();
    write_config(
        dir.path(),
        "api_key = \"test-key\"\n\n[rate_limit]\ndaily_limit = 1\n",
    );

    kdb(dir.path(), T0, &["quota", "record"]).success();

    kdb(dir.path(), T0 + 200_000, &["quota", "check"])
        .success()
        .stdout(predicate::str::contains("1回"));

    kdb(dir.path(), T0 + 86_400_000, &["quota", "check"])
        .success()
        .stdout(predicate::str::diff("allowed\n"));
}

#[test]
fn test_reset_clears_state() {
    let dir = tempdir().unwrap();

    kdb(dir.path(), T0, &["quota", "record"]).success();
    kdb(dir.path(), T0 + 1000, &["quota", "reset"])
        .success()
        .stdout(predicate::str::contains("Cleared quota state"));

    kdb(dir.path(), T0 + 1000, &["quota", "status"])
        .success()
        .stdout(predicate::str::contains("used today: 0/5"))
        .stdout(predicate::str::contains("利用可能"));
}
