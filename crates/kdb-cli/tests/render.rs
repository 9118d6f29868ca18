use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_render_from_stdin() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("kdb")
        .env("KDB_HOME", dir.path())
        .arg("render")
        .write_stdin("# Title\n- item\n[Intro](http://example.com)")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"<h2>Title</h2><br><li>item</li><br><a href="http://example.com" target="_blank" class="course-link">Intro</a>"#,
        ));
}

#[test]
fn test_render_from_file_keeps_details_newlines() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("answer.md");
    fs::write(&input, "<details>a\nb</details>\nc").unwrap();

    cargo_bin_cmd!("kdb")
        .env("KDB_HOME", dir.path())
        .arg("render")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("<details>a\nb</details><br>c"));
}

#[test]
fn test_render_missing_file_fails() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("kdb")
        .env("KDB_HOME", dir.path())
        .args(["render", "does-not-exist.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}
