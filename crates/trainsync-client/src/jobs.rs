//! Job control over the service's REST API.

use crate::http::HttpService;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use trainsync_core::job::{clamp_progress, parse_remote_timestamp};
use trainsync_core::{
    ControlAck, ControlAction, HealthReport, Job, JobControl, JobHandle, JobId, JobStatus, Metrics, SyncError,
    SyncResult, TrainingJobSpec,
};

#[derive(Debug, Deserialize)]
struct StartResponse {
    job_id: String,
    #[serde(default)]
    task_id: Option<String>,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    #[serde(default)]
    job_id: Option<String>,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// `GET /jobs/{id}` body. On completion the evaluation fields sit at the
/// top level next to the bookkeeping ones.
#[derive(Debug, Deserialize)]
struct JobSnapshot {
    #[serde(default)]
    job_id: Option<String>,
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    epoch: Option<u32>,
    #[serde(default)]
    total_epochs: Option<u32>,
    #[serde(default)]
    metrics: Option<Metrics>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

fn parse_status(raw: &str, op: &str) -> SyncResult<JobStatus> {
    JobStatus::from_remote(raw)
        .ok_or_else(|| SyncError::MalformedResponse(format!("{op}: unknown job status '{raw}'")))
}

impl JobSnapshot {
    fn into_job(self, requested: &JobId) -> SyncResult<Job> {
        let status = parse_status(&self.status, "status")?;
        let id = self.job_id.map_or_else(|| requested.clone(), JobId::new);
        let mut job = Job::new(id, status);
        job.progress = self
            .progress
            .map(clamp_progress)
            .or_else(|| (status == JobStatus::Completed).then_some(100));
        job.epoch = self.epoch;
        job.total_epochs = self.total_epochs;
        job.error = self.error;
        job.message = self.message;
        job.created_at = self.created_at.as_deref().and_then(parse_remote_timestamp);
        job.completed_at = self.completed_at.as_deref().and_then(parse_remote_timestamp);

        let evaluation: Metrics = self
            .rest
            .iter()
            .filter(|(k, v)| v.is_number() && k.as_str() != "training_time" && k.as_str() != "elapsed_time")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        job.metrics = self.metrics.unwrap_or_default();
        if status == JobStatus::Completed {
            if job.metrics.is_empty() {
                job.metrics = evaluation;
            }
            job.result = Some(serde_json::Value::Object(self.rest));
        }
        Ok(job)
    }
}

/// REST client for `/train`, `/jobs/{id}` and `/health`.
#[derive(Debug, Clone)]
pub struct JobControlClient {
    http: HttpService,
}

impl JobControlClient {
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        Ok(Self { http: HttpService::new(base_url, timeout)? })
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }
}

#[async_trait]
impl JobControl for JobControlClient {
    async fn start(&self, spec: &TrainingJobSpec) -> SyncResult<JobHandle> {
        let body = spec.validate()?;
        debug!(dataset_id = %body.dataset_id, model = ?body.model_config.get("model_type"), "starting job");

        let response: StartResponse = self.http.send_json(self.http.post(&["train"])?.json(&body), "start").await?;
        let status = parse_status(&response.status, "start")?;
        info!(job_id = %response.job_id, %status, "job accepted");
        Ok(JobHandle {
            job_id: JobId::new(response.job_id),
            task_id: response.task_id,
            status,
            message: response.message,
        })
    }

    async fn status(&self, job_id: &JobId) -> SyncResult<Job> {
        let request = self.http.get(&["jobs", job_id.as_str()])?;
        let snapshot: JobSnapshot = self.http.send_json(request, "status").await?;
        snapshot.into_job(job_id)
    }

    async fn control(&self, job_id: &JobId, action: ControlAction) -> SyncResult<ControlAck> {
        let request = self.http.post(&["jobs", job_id.as_str(), action.as_str()])?;
        let response: AckResponse = self.http.send_json(request, action.as_str()).await?;
        let status = parse_status(&response.status, action.as_str())?;
        info!(job_id = %job_id, %action, %status, "control call acknowledged");
        Ok(ControlAck {
            job_id: response.job_id.map_or_else(|| job_id.clone(), JobId::new),
            status,
            message: response.message,
        })
    }

    async fn health(&self) -> SyncResult<HealthReport> {
        self.http.send_json(self.http.get(&["health"])?, "health").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completed_snapshot_exposes_result() {
        let snapshot: JobSnapshot = serde_json::from_value(json!({
            "job_id": "job_1",
            "status": "completed",
            "task_type": "classification",
            "accuracy": 0.93,
            "f1": 0.92,
            "training_time": 2.5,
            "model_path": "models/job_1_model.pkl",
            "completed_at": "2024-06-01T10:00:00.000001"
        }))
        .unwrap();
        let job = snapshot.into_job(&JobId::new("job_1")).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, Some(100));
        assert_eq!(job.metrics["accuracy"], 0.93);
        assert!(!job.metrics.contains_key("training_time"));
        assert_eq!(job.result.unwrap()["model_path"], "models/job_1_model.pkl");
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_failed_snapshot_maps_to_error() {
        let snapshot: JobSnapshot =
            serde_json::from_value(json!({"job_id": "job_2", "status": "failed", "error": "boom"})).unwrap();
        let job = snapshot.into_job(&JobId::new("job_2")).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let snapshot: JobSnapshot = serde_json::from_value(json!({"status": "melting"})).unwrap();
        assert!(matches!(
            snapshot.into_job(&JobId::new("x")),
            Err(SyncError::MalformedResponse(_))
        ));
    }
}
