use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn validate_command_accepts_valid_configuration() {
    let temp = TempDir::new().expect("temp dir should create");
    let config_path = temp.path().join("relay.yaml");
    fs::copy("config/relay.yaml", config_path).expect("config file should copy");

    Command::cargo_bin("episode-relay")
        .expect("binary should compile")
        .args([
            "validate",
            "-c",
            temp.path().to_str().expect("path should stringify"),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration at"));
}

#[test]
fn validate_command_rejects_invalid_origin() {
    let temp = TempDir::new().expect("temp dir should create");
    fs::write(
        temp.path().join("relay.yaml"),
        r#"
listen:
  host: "127.0.0.1"
  port: 3000
upstream:
  origin: "not a url"
  connect_timeout_ms: 1000
  request_timeout_ms: 1000
"#,
    )
    .expect("config should write");

    Command::cargo_bin("episode-relay")
        .expect("binary should compile")
        .args([
            "validate",
            "-c",
            temp.path().to_str().expect("path should stringify"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("upstream.origin"));
}

#[test]
fn validate_command_reports_missing_configuration() {
    let temp = TempDir::new().expect("temp dir should create");

    Command::cargo_bin("episode-relay")
        .expect("binary should compile")
        .args([
            "validate",
            "-c",
            temp.path().to_str().expect("path should stringify"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn serve_command_fails_fast_on_missing_configuration() {
    let temp = TempDir::new().expect("temp dir should create");
    let missing = temp.path().join("absent.yaml");

    Command::cargo_bin("episode-relay")
        .expect("binary should compile")
        .args([
            "serve",
            "-c",
            missing.to_str().expect("path should stringify"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}
