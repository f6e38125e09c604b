use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Algorithm-dependent metrics snapshot (accuracy, loss, mse, ...).
pub type Metrics = BTreeMap<String, serde_json::Value>;

/// Opaque job identifier issued by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    Paused,
    Completed,
    Error,
    Stopped,
}

impl JobStatus {
    /// Parse a status string as reported by the backend.
    ///
    /// The backend also uses `accepted`, `failed` and `cancelled`; those map
    /// onto `queued`, `error` and `stopped`.
    pub fn from_remote(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "queued" | "accepted" | "pending" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "error" | "failed" => Some(Self::Error),
            "stopped" | "cancelled" | "canceled" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Stopped)
    }

    /// States from which the backend may legitimately restart progress counting.
    pub fn is_retry(self) -> bool {
        matches!(self, Self::Created | Self::Queued | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend model family a user-facing alias resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    KNearestNeighbors,
    RandomForest,
    SupportVectorMachine,
    DecisionTree,
}

const MODEL_ALIASES: &[(&str, ModelFamily)] = &[
    ("knn", ModelFamily::KNearestNeighbors),
    ("k_nearest_neighbors", ModelFamily::KNearestNeighbors),
    ("random_forest", ModelFamily::RandomForest),
    ("svm", ModelFamily::SupportVectorMachine),
    ("support_vector_machine", ModelFamily::SupportVectorMachine),
    ("decision_tree", ModelFamily::DecisionTree),
    ("dt", ModelFamily::DecisionTree),
];

impl ModelFamily {
    pub fn resolve(alias: &str) -> SyncResult<Self> {
        let needle = alias.trim().to_ascii_lowercase();
        MODEL_ALIASES
            .iter()
            .find(|(name, _)| *name == needle)
            .map(|(_, family)| *family)
            .ok_or_else(|| SyncError::UnsupportedModel {
                requested: alias.to_string(),
                supported: Self::supported_aliases(),
            })
    }

    pub fn supported_aliases() -> Vec<String> {
        MODEL_ALIASES.iter().map(|(name, _)| (*name).to_string()).collect()
    }

    /// Name the backend expects in `model_config.model_type`.
    pub fn canonical_alias(self) -> &'static str {
        match self {
            Self::KNearestNeighbors => "knn",
            Self::RandomForest => "random_forest",
            Self::SupportVectorMachine => "svm",
            Self::DecisionTree => "decision_tree",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::KNearestNeighbors => "K-Nearest Neighbors (KNN)",
            Self::RandomForest => "Random Forest",
            Self::SupportVectorMachine => "Support Vector Machine (SVM)",
            Self::DecisionTree => "Decision Tree",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Classification,
    Regression,
}

impl TaskType {
    pub fn parse(raw: &str) -> SyncResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "classification" => Ok(Self::Classification),
            "regression" => Ok(Self::Regression),
            "" => Err(SyncError::InvalidInput("task_type is required".to_string())),
            other => Err(SyncError::InvalidInput(format!(
                "task_type must be 'classification' or 'regression', got '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Regression => "regression",
        }
    }
}

/// What the caller asks to train.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub dataset_id: String,
    pub model_id: String,
    pub target_column: String,
    pub task_type: String,
    /// Extra hyper-parameters passed through to the backend untouched.
    #[serde(default)]
    pub hyperparams: serde_json::Map<String, serde_json::Value>,
}

/// Validated `POST /train` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainRequest {
    /// The service locates the dataset by this value under the `dataset_path` key.
    #[serde(rename = "dataset_path")]
    pub dataset_id: String,
    pub model_config: serde_json::Map<String, serde_json::Value>,
    pub target_column: String,
    pub task_type: TaskType,
}

impl TrainingJobSpec {
    pub fn new(
        dataset_id: impl Into<String>,
        model_id: impl Into<String>,
        target_column: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            model_id: model_id.into(),
            target_column: target_column.into(),
            task_type: task_type.into(),
            hyperparams: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.hyperparams.insert(key.into(), value);
        self
    }

    /// Validate and build the request body. Never touches the network.
    pub fn validate(&self) -> SyncResult<TrainRequest> {
        for (field, value) in [
            ("dataset_id", &self.dataset_id),
            ("model_id", &self.model_id),
            ("target_column", &self.target_column),
            ("task_type", &self.task_type),
        ] {
            if value.trim().is_empty() {
                return Err(SyncError::InvalidInput(format!("{field} is required")));
            }
        }

        let family = ModelFamily::resolve(&self.model_id)?;
        let task_type = TaskType::parse(&self.task_type)?;

        let mut model_config = self.hyperparams.clone();
        model_config.insert(
            "model_type".to_string(),
            serde_json::Value::String(family.canonical_alias().to_string()),
        );

        Ok(TrainRequest {
            dataset_id: self.dataset_id.trim().to_string(),
            model_config,
            target_column: self.target_column.trim().to_string(),
            task_type,
        })
    }
}

/// Returned by a successful `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_id: JobId,
    pub task_id: Option<String>,
    pub status: JobStatus,
    pub message: Option<String>,
}

/// Acknowledgement of a pause/resume/stop call.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlAck {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: Option<String>,
}

/// Read-mostly mirror of the remote job record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub epoch: Option<u32>,
    pub total_epochs: Option<u32>,
    pub metrics: Metrics,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, status: JobStatus) -> Self {
        Self {
            id,
            status,
            progress: None,
            epoch: None,
            total_epochs: None,
            metrics: Metrics::new(),
            result: None,
            error: None,
            message: None,
            created_at: None,
            completed_at: None,
        }
    }
}

/// Parse a backend timestamp. Naive ISO-8601 values are taken as UTC.
pub fn parse_remote_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Clamp a remote progress value into `0..=100`.
pub fn clamp_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}
