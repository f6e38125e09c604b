//! Remote dataset registry seam: existence checks, preprocessing history
//! and preview pages.

use crate::error::SyncResult;
use crate::job::parse_remote_timestamp;
use crate::paging::{Page, PageWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One row of a dataset preview, in column order.
pub type PreviewRow = Vec<serde_json::Value>;

/// Ids arrive as strings or integers depending on the endpoint.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

/// A preprocessing step as recorded by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingStep {
    pub id: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub dataset_id: String,
    pub step_type: String,
    #[serde(default)]
    pub step_name: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl PreprocessingStep {
    /// Steps without a status predate status tracking and only exist once applied.
    pub fn is_successful(&self) -> bool {
        self.status.as_deref().is_none_or(|s| {
            matches!(s.to_ascii_lowercase().as_str(), "completed" | "success" | "succeeded" | "applied")
        })
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_remote_timestamp)
    }

    /// Method names from `config.method` or `config.methods`.
    pub fn methods(&self) -> Vec<String> {
        if let Some(method) = self.config.get("method").and_then(|m| m.as_str()) {
            return vec![method.to_string()];
        }
        string_list(self.config.get("methods"))
    }

    pub fn columns(&self) -> Vec<String> {
        string_list(self.config.get("columns"))
    }

    pub fn execution_time(&self) -> Option<f64> {
        self.config.get("execution_time").and_then(serde_json::Value::as_f64)
    }
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => {
            items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
        }
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// The remote system of record for datasets.
#[async_trait]
pub trait DatasetRegistry: Send + Sync {
    /// `Ok(false)` only when the registry confirms the dataset is gone.
    async fn dataset_exists(&self, dataset_id: &str) -> SyncResult<bool>;

    async fn preprocessing_steps(&self, dataset_id: &str) -> SyncResult<Vec<PreprocessingStep>>;

    async fn preview(&self, dataset_id: &str, window: PageWindow) -> SyncResult<Page<PreviewRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(config: serde_json::Value, status: Option<&str>) -> PreprocessingStep {
        serde_json::from_value(json!({
            "id": 3,
            "dataset_id": 12,
            "step_type": "missing_values",
            "config": config,
            "status": status,
            "created_at": "2024-04-02T08:00:00.5"
        }))
        .unwrap()
    }

    #[test]
    fn test_numeric_dataset_id_and_config_fields() {
        let s = step(json!({"method": "mean", "columns": ["age", "income"], "execution_time": 1.5}), None);
        assert_eq!(s.dataset_id, "12");
        assert_eq!(s.methods(), vec!["mean"]);
        assert_eq!(s.columns(), vec!["age", "income"]);
        assert_eq!(s.execution_time(), Some(1.5));
        assert!(s.created_at().is_some());
        assert!(s.is_successful());
    }

    #[test]
    fn test_methods_list_and_null_columns() {
        let s = step(json!({"methods": ["standard", "minmax"], "columns": null}), Some("completed"));
        assert_eq!(s.methods(), vec!["standard", "minmax"]);
        assert!(s.columns().is_empty());
    }

    #[test]
    fn test_failed_step_is_not_successful() {
        assert!(!step(json!({}), Some("failed")).is_successful());
    }
}
