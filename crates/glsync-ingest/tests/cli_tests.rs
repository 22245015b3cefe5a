//! End-to-end tests for the glsync binary

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn write_json(dir: &TempDir, name: &str, value: serde_json::Value) -> PathBuf {
    let file = dir.path().join(name);
    fs::write(&file, value.to_string()).expect("Failed to write test file");
    file
}

fn projects_only_catalog(dir: &TempDir) -> PathBuf {
    let mut catalog = serde_json::to_value(glsync_ingest::catalog::discover()).unwrap();
    for entry in catalog["streams"].as_array_mut().unwrap() {
        let selected = entry["tap_stream_id"] == "projects";
        entry["metadata"][0]["metadata"]["selected"] = json!(selected);
    }
    write_json(dir, "catalog.json", catalog)
}

fn glsync(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("glsync").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("GLSYNC_PRIVATE_TOKEN")
        .env_remove("GLSYNC_API_URL")
        .env_remove("GLSYNC_START_DATE")
        .env_remove("GLSYNC_CONFIG")
        .env("LOG_LEVEL", "warn");
    cmd
}

#[test]
fn test_discover_prints_catalog() {
    let dir = TempDir::new().unwrap();
    let config = write_json(
        &dir,
        "config.json",
        json!({"private_token": "glpat-x", "start_date": "2024-01-01T00:00:00Z"}),
    );

    glsync(&dir)
        .arg("--config")
        .arg(&config)
        .arg("--discover")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""tap_stream_id": "projects""#))
        .stdout(predicate::str::contains(r#""forced-replication-method": "FULL_TABLE""#));
}

#[test]
fn test_missing_token_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_json(&dir, "config.json", json!({"start_date": "2024-01-01T00:00:00Z"}));

    glsync(&dir)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[tokio::test]
async fn test_sync_writes_messages_to_stdout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/42"))
        .and(header("PRIVATE-TOKEN", "glpat-x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "name": "app",
            "updated_at": "2024-02-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = write_json(
        &dir,
        "config.json",
        json!({
            "private_token": "glpat-x",
            "start_date": "2024-01-01T00:00:00Z",
            "api_url": mock_server.uri(),
            "projects": "42"
        }),
    );

    let catalog = projects_only_catalog(&dir);
    let state = write_json(&dir, "state.json", json!({}));

    glsync(&dir)
        .arg("--config")
        .arg(&config)
        .arg("--catalog")
        .arg(&catalog)
        .arg("--state")
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"SCHEMA","stream":"projects""#))
        .stdout(predicate::str::contains(r#""type":"RECORD","stream":"projects""#))
        .stdout(predicate::str::contains(r#""currentlySyncing":null"#));
}

#[tokio::test]
async fn test_fatal_http_error_exits_non_zero() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/42"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "401 Unauthorized"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = write_json(
        &dir,
        "config.json",
        json!({
            "private_token": "expired",
            "start_date": "2024-01-01T00:00:00Z",
            "api_url": mock_server.uri(),
            "projects": ["42"]
        }),
    );
    let catalog = projects_only_catalog(&dir);

    glsync(&dir)
        .arg("--config")
        .arg(&config)
        .arg("--catalog")
        .arg(&catalog)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains(r#""currentlySyncing":"projects""#));
}
