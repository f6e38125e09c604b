//! Remote job control seam.

use crate::error::SyncResult;
use crate::job::{ControlAck, Job, JobHandle, JobId, TrainingJobSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pause, resume or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
}

impl ControlAction {
    /// Path segment under `/jobs/{id}/`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `GET /health` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Per-dependency detail (queue broker, database, ...).
    #[serde(default)]
    pub services: BTreeMap<String, serde_json::Value>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy") || self.status.eq_ignore_ascii_case("ok")
    }
}

/// Stateless calls against the remote job API.
///
/// Implementations validate input before dispatch, bound every call by a
/// timeout and classify failures into [`crate::SyncError`]. They never touch
/// a job view; callers hand responses to the tracker.
#[async_trait]
pub trait JobControl: Send + Sync {
    async fn start(&self, spec: &TrainingJobSpec) -> SyncResult<JobHandle>;

    async fn status(&self, job_id: &JobId) -> SyncResult<Job>;

    /// Advisory. The service may refuse in the job's current state.
    async fn control(&self, job_id: &JobId, action: ControlAction) -> SyncResult<ControlAck>;

    async fn health(&self) -> SyncResult<HealthReport>;

    async fn pause(&self, job_id: &JobId) -> SyncResult<ControlAck> {
        self.control(job_id, ControlAction::Pause).await
    }

    async fn resume(&self, job_id: &JobId) -> SyncResult<ControlAck> {
        self.control(job_id, ControlAction::Resume).await
    }

    async fn stop(&self, job_id: &JobId) -> SyncResult<ControlAck> {
        self.control(job_id, ControlAction::Stop).await
    }
}
