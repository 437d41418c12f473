// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI smoke tests for `isled --check-config`.

use assert_cmd::Command;

fn isled() -> Command {
    Command::cargo_bin("isled").unwrap_or_else(|_| panic!("isled binary not built"))
}

#[test]
fn valid_config_passes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("isled.toml");
    std::fs::write(
        &path,
        r#"
[machine]
workers = 2

[[mount]]
path = "/queues/main"
driver = "isle.pipe"
"#,
    )
    .unwrap();

    isled()
        .arg("--check-config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("config ok: 1 mounts"));
}

#[test]
fn invalid_config_fails_with_reason() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("isled.toml");
    std::fs::write(&path, "[machine]\nworkers = 0\n").unwrap();

    isled()
        .arg("--check-config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicates::str::contains("workers"));
}

#[test]
fn missing_config_fails() {
    isled()
        .arg("--check-config")
        .arg("/no/such/isled.toml")
        .assert()
        .failure();
}

#[test]
fn version_flag_prints_and_exits() {
    isled()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("isled"));
}

#[test]
fn unexpected_arguments_are_refused() {
    isled().arg("--bogus").assert().failure();
}
