//! REST clients against a mock service.

use mockito::Matcher;
use serde_json::json;
use std::time::Duration;
use trainsync_client::{JobControlClient, RegistryClient};
use trainsync_core::{
    ControlAction, DatasetRegistry, ErrorKind, JobControl, JobId, JobStatus, SyncError, TrainingJobSpec,
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_start_sends_canonical_model_type() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/train")
        .match_body(Matcher::PartialJson(json!({
            "dataset_path": "ds_1",
            "target_column": "label",
            "task_type": "classification",
            "model_config": {"model_type": "knn", "n_neighbors": 5}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"job_id":"job_42","task_id":"t-1","status":"queued","message":"Training job created"}"#)
        .create_async()
        .await;

    let client = JobControlClient::new(&server.url(), TIMEOUT).unwrap();
    let spec = TrainingJobSpec::new("ds_1", "K_Nearest_Neighbors", "label", "classification")
        .with_param("n_neighbors", json!(5));
    let handle = client.start(&spec).await.unwrap();

    mock.assert_async().await;
    assert_eq!(handle.job_id, JobId::new("job_42"));
    assert_eq!(handle.status, JobStatus::Queued);
    assert_eq!(handle.task_id.as_deref(), Some("t-1"));
}

#[tokio::test]
async fn test_start_rejects_unknown_model_without_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/train").expect(0).create_async().await;

    let client = JobControlClient::new(&server.url(), TIMEOUT).unwrap();
    let err = client
        .start(&TrainingJobSpec::new("ds_1", "xgboost", "label", "classification"))
        .await
        .unwrap_err();

    mock.assert_async().await;
    match err {
        SyncError::UnsupportedModel { requested, supported } => {
            assert_eq!(requested, "xgboost");
            assert!(supported.iter().any(|s| s == "random_forest"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_pause_passes_detail_through() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/jobs/job_7/pause")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail":"Cannot pause job. Current status: completed"}"#)
        .create_async()
        .await;

    let client = JobControlClient::new(&server.url(), TIMEOUT).unwrap();
    let err = client.pause(&JobId::new("job_7")).await.unwrap_err();

    match err {
        SyncError::RemoteRejected { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Cannot pause job. Current status: completed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_resume_ack() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/jobs/job_7/resume")
        .with_status(200)
        .with_body(r#"{"job_id":"job_7","status":"running","message":"Job resumed"}"#)
        .create_async()
        .await;

    let client = JobControlClient::new(&server.url(), TIMEOUT).unwrap();
    let ack = client.control(&JobId::new("job_7"), ControlAction::Resume).await.unwrap();
    assert_eq!(ack.status, JobStatus::Running);
    assert_eq!(ack.message.as_deref(), Some("Job resumed"));
}

#[tokio::test]
async fn test_server_error_is_remote_fault() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/jobs/job_9")
        .with_status(500)
        .with_body(r#"{"detail":"database unavailable"}"#)
        .create_async()
        .await;

    let client = JobControlClient::new(&server.url(), TIMEOUT).unwrap();
    let err = client.status(&JobId::new("job_9")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteFault);
    assert!(err.to_string().contains("database unavailable"));
}

#[tokio::test]
async fn test_garbage_body_is_malformed() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/jobs/job_9")
        .with_status(200)
        .with_body("<html>not json</html>")
        .create_async()
        .await;

    let client = JobControlClient::new(&server.url(), TIMEOUT).unwrap();
    let err = client.status(&JobId::new("job_9")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_refused_connection_is_service_unavailable() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = JobControlClient::new(&format!("http://127.0.0.1:{port}"), TIMEOUT).unwrap();
    let err = client.health().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
}

#[tokio::test]
async fn test_silent_service_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = JobControlClient::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
    let err = client.status(&JobId::new("job_1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_health_report() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/health")
        .with_status(200)
        .with_body(r#"{"status":"healthy","timestamp":"2024-06-01T10:00:00","services":{"redis":"up"}}"#)
        .create_async()
        .await;

    let client = JobControlClient::new(&server.url(), TIMEOUT).unwrap();
    let report = client.health().await.unwrap();
    assert!(report.is_healthy());
    assert_eq!(report.services["redis"], "up");
}

#[tokio::test]
async fn test_invalid_page_window_never_hits_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Regex(r"^/datasets/.*".to_string()))
        .expect(0)
        .create_async()
        .await;

    let client = RegistryClient::new(&server.url(), TIMEOUT).unwrap();
    for (page, size) in [(0, 50), (1, 0)] {
        let err = client.fetch_preview("ds_1", page, size).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidPageWindow { .. }));
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_preview_pages_of_ninety_five_rows() {
    let mut server = mockito::Server::new_async().await;
    let columns = json!(["id", "value"]);
    let first: Vec<_> = (0..50).map(|i| json!([i, i * 2])).collect();
    let second: Vec<_> = (50..95).map(|i| json!({"id": i, "value": i * 2})).collect();

    let _page1 = server
        .mock("GET", "/datasets/ds_1/preview")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".into(), "1".into()),
            Matcher::UrlEncoded("page_size".into(), "50".into()),
        ]))
        .with_status(200)
        .with_body(json!({"columns": columns, "rows": first, "totalRows": 95}).to_string())
        .create_async()
        .await;
    let _page2 = server
        .mock("GET", "/datasets/ds_1/preview")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".into(), "2".into()),
            Matcher::UrlEncoded("page_size".into(), "50".into()),
        ]))
        .with_status(200)
        .with_body(json!({"columns": columns, "data": second, "total_rows": 95}).to_string())
        .create_async()
        .await;

    let client = RegistryClient::new(&server.url(), TIMEOUT).unwrap();
    let page = client.fetch_preview("ds_1", 1, 50).await.unwrap();
    assert_eq!(page.items.len(), 50);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.columns, vec!["id", "value"]);

    let next = page.next_window().unwrap();
    let page = client.preview("ds_1", next).await.unwrap();
    assert_eq!(page.items.len(), 45);
    assert_eq!(page.items[0], vec![json!(50), json!(100)]);
    assert!(page.next_window().is_none());
}

#[tokio::test]
async fn test_preview_with_missing_fields_is_empty() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/datasets/ds_2/preview")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"rows": "oops"}"#)
        .create_async()
        .await;

    let client = RegistryClient::new(&server.url(), TIMEOUT).unwrap();
    let page = client.fetch_preview("ds_2", 1, 25).await.unwrap();
    assert!(page.items.is_empty());
    assert!(page.columns.is_empty());
    assert_eq!(page.total_pages, 1);
}

#[tokio::test]
async fn test_dataset_exists() {
    let mut server = mockito::Server::new_async().await;
    let _found = server
        .mock("GET", "/datasets/ds_1")
        .with_status(200)
        .with_body(r#"{"id":"ds_1"}"#)
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/datasets/gone")
        .with_status(404)
        .with_body(r#"{"detail":"Dataset not found"}"#)
        .create_async()
        .await;

    let client = RegistryClient::new(&server.url(), TIMEOUT).unwrap();
    assert!(client.dataset_exists("ds_1").await.unwrap());
    assert!(!client.dataset_exists("gone").await.unwrap());
}

#[tokio::test]
async fn test_preprocessing_history() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/datasets/ds_1/preprocessing")
        .with_status(200)
        .with_body(
            json!([
                {"id": 1, "dataset_id": "ds_1", "step_type": "missing_values",
                 "config": {"method": "mean", "columns": ["age"]},
                 "status": "completed", "created_at": "2024-06-01T10:00:00"},
                {"id": 2, "dataset_id": "ds_1", "step_type": "encoding",
                 "config": {}, "status": "failed", "created_at": "2024-06-02T10:00:00"}
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let client = RegistryClient::new(&server.url(), TIMEOUT).unwrap();
    let steps = client.preprocessing_steps("ds_1").await.unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps[0].is_successful());
    assert!(!steps[1].is_successful());
}
