//! Integration tests for the `tsync` binary. Service calls only ever reach
//! a local mock or a closed port.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `tsync` isolated from the developer's config files and environment.
fn tsync(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tsync").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("TRAINSYNC_BASE_URL")
        .env_remove("TRAINSYNC_WS_URL")
        .env_remove("TRAINSYNC_REQUEST_TIMEOUT_MS")
        .env_remove("TRAINSYNC_LOG_LEVEL")
        .env("TRAINSYNC_CACHE_PATH", home.path().join("cache.json"));
    cmd
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    tsync(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("preview"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn test_models_lists_aliases() {
    let home = TempDir::new().unwrap();
    tsync(&home)
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("random_forest"))
        .stdout(predicate::str::contains("Support Vector Machine"));
}

#[test]
fn test_invalid_page_window_fails_locally() {
    let home = TempDir::new().unwrap();
    // Nothing listens on the discard port; a network call would report unavailability instead.
    tsync(&home)
        .args(["--base-url", "http://127.0.0.1:9", "preview", "ds_1", "--page", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid page window"))
        .stderr(predicate::str::contains("Correct the input"));
}

#[test]
fn test_unsupported_model_fails_locally() {
    let home = TempDir::new().unwrap();
    tsync(&home)
        .args([
            "--base-url",
            "http://127.0.0.1:9",
            "train",
            "--dataset",
            "ds_1",
            "--model",
            "xgboost",
            "--target",
            "label",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported model 'xgboost'"))
        .stderr(predicate::str::contains("knn"));
}

#[test]
fn test_bad_task_type_fails_locally() {
    let home = TempDir::new().unwrap();
    tsync(&home)
        .args(["train", "--dataset", "ds_1", "--model", "knn", "--target", "y", "--task", "clustering"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task_type must be"));
}

#[test]
fn test_malformed_config_file_is_reported() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join(".trainsyncrc"), "base_url = [not toml").unwrap();
    tsync(&home)
        .arg("models")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn test_non_http_base_url_is_rejected() {
    let home = TempDir::new().unwrap();
    tsync(&home)
        .args(["--base-url", "ftp://example.com", "models"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("base_url must be http(s)"));
}

#[test]
fn test_empty_cache_list() {
    let home = TempDir::new().unwrap();
    tsync(&home)
        .args(["cache", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_unreachable_service_hint() {
    let home = TempDir::new().unwrap();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    tsync(&home)
        .args(["--base-url", &format!("http://127.0.0.1:{port}"), "status", "job_1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("service unavailable"))
        .stderr(predicate::str::contains("not running"));
}

fn cached_step(dataset_id: &str, step_type: &str) -> serde_json::Value {
    serde_json::json!({
        "dataset_id": dataset_id,
        "step_type": step_type,
        "methods": ["mean"],
        "columns": ["age"],
        "execution_time": 0.2,
        "executed": true,
        "step_id": 1,
        "remote_created_at": "2024-06-01T10:00:00Z"
    })
}

#[test]
fn test_cache_list_drops_entries_of_deleted_datasets() {
    let home = TempDir::new().unwrap();
    let cache = serde_json::json!({
        "version": 1,
        "entries": {
            "gone::missing_values": cached_step("gone", "missing_values"),
            "gone::encoding": cached_step("gone", "encoding"),
            "kept::scaling": cached_step("kept", "scaling")
        }
    });
    std::fs::write(home.path().join("cache.json"), cache.to_string()).unwrap();

    let mut server = mockito::Server::new();
    let gone = server
        .mock("GET", "/datasets/gone")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail":"Dataset not found"}"#)
        .create();
    let kept = server
        .mock("GET", "/datasets/kept")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"kept","name":"kept.csv"}"#)
        .create();

    tsync(&home)
        .args(["--base-url", &server.url(), "cache", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kept\""))
        .stdout(predicate::str::contains("\"gone\"").not());

    gone.assert();
    kept.assert();
    let on_disk = std::fs::read_to_string(home.path().join("cache.json")).unwrap();
    assert!(!on_disk.contains("gone::"));
    assert!(on_disk.contains("kept::scaling"));
}
