//! Step cache: local memo of preprocessing steps already executed remotely.
//!
//! Records are keyed by `(dataset_id, step_type)`. Stores keep each record
//! as raw JSON so an entry that no longer parses surfaces as
//! [`CacheError::Corrupted`] instead of poisoning the whole store.

pub mod file;
pub mod memory;
pub mod reconcile;
pub mod restore;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;
pub use reconcile::{CacheReconciler, ReconcileReport};
pub use restore::{RestoreOutcome, StepRestorer};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::error::SyncError;

const KEY_SEPARATOR: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub dataset_id: String,
    pub step_type: String,
}

impl CacheKey {
    pub fn new(dataset_id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self { dataset_id: dataset_id.into(), step_type: step_type.into() }
    }

    /// Flat form used as the persisted map key.
    pub fn to_storage_key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.dataset_id, self.step_type)
    }

    pub fn from_storage_key(raw: &str) -> Option<Self> {
        let (dataset_id, step_type) = raw.rsplit_once(KEY_SEPARATOR)?;
        if dataset_id.is_empty() || step_type.is_empty() {
            return None;
        }
        Some(Self::new(dataset_id, step_type))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.dataset_id, self.step_type)
    }
}

/// Last known successful execution of one step type on one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub dataset_id: String,
    pub step_type: String,
    pub methods: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub execution_time: Option<f64>,
    pub executed: bool,
    /// Remote id of the step this record was restored from.
    pub step_id: i64,
    pub remote_created_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.dataset_id, &self.step_type)
    }

    /// Whether `self` describes a later remote execution than `other`.
    pub fn supersedes(&self, other: &Self) -> bool {
        (self.remote_created_at, self.step_id) > (other.remote_created_at, other.step_id)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry {key} is corrupted: {reason}")]
    Corrupted { key: CacheKey, reason: String },

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CacheError> for SyncError {
    fn from(err: CacheError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Raw entries as persisted.
pub(crate) type RawEntries = BTreeMap<String, serde_json::Value>;

/// Decode one raw entry, checking it belongs under `key`.
pub(crate) fn decode_record(key: &CacheKey, raw: &serde_json::Value) -> Result<CacheRecord, CacheError> {
    let record: CacheRecord = serde_json::from_value(raw.clone())
        .map_err(|e| CacheError::Corrupted { key: key.clone(), reason: e.to_string() })?;
    if record.key() != *key {
        return Err(CacheError::Corrupted {
            key: key.clone(),
            reason: format!("record describes {}", record.key()),
        });
    }
    Ok(record)
}

pub(crate) fn encode_record(record: &CacheRecord) -> Result<serde_json::Value, CacheError> {
    serde_json::to_value(record).map_err(|e| CacheError::Backend(e.to_string()))
}

/// Keys of `entries`. Unparseable map keys are reported so they can be purged.
pub(crate) fn entry_keys(entries: &RawEntries) -> (Vec<CacheKey>, Vec<String>) {
    let mut keys = Vec::new();
    let mut invalid = Vec::new();
    for raw in entries.keys() {
        match CacheKey::from_storage_key(raw) {
            Some(key) => keys.push(key),
            None => invalid.push(raw.clone()),
        }
    }
    (keys, invalid)
}

/// Persistent key/value store for step cache records.
pub trait CacheStore: Send + Sync {
    /// `Err(Corrupted)` when the stored entry does not deserialize.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, CacheError>;

    fn put(&self, record: &CacheRecord) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    fn delete(&self, key: &CacheKey) -> Result<bool, CacheError>;

    fn keys(&self) -> Result<Vec<CacheKey>, CacheError>;

    fn keys_for_dataset(&self, dataset_id: &str) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self.keys()?.into_iter().filter(|k| k.dataset_id == dataset_id).collect())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn record(dataset_id: &str, step_type: &str, step_id: i64, created: &str) -> CacheRecord {
        CacheRecord {
            dataset_id: dataset_id.to_string(),
            step_type: step_type.to_string(),
            methods: vec!["mean".to_string()],
            columns: vec!["age".to_string()],
            execution_time: Some(0.4),
            executed: true,
            step_id,
            remote_created_at: DateTime::parse_from_rfc3339(created).unwrap().with_timezone(&Utc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn test_storage_key_keeps_separators_in_dataset_id() {
        let key = CacheKey::new("team::ds", "missing_values");
        let parsed = CacheKey::from_storage_key(&key.to_storage_key()).unwrap();
        assert_eq!(parsed, key);
        assert!(CacheKey::from_storage_key("no-separator").is_none());
    }

    #[test]
    fn test_supersedes_orders_by_time_then_id() {
        let old = record("a", "scaling", 9, "2024-01-01T00:00:00Z");
        let new = record("a", "scaling", 2, "2024-02-01T00:00:00Z");
        let same_time_higher_id = record("a", "scaling", 10, "2024-01-01T00:00:00Z");
        assert!(new.supersedes(&old));
        assert!(same_time_higher_id.supersedes(&old));
        assert!(!old.supersedes(&old));
    }

    #[test]
    fn test_decode_rejects_mismatched_key() {
        let raw = encode_record(&record("a", "scaling", 1, "2024-01-01T00:00:00Z")).unwrap();
        let err = decode_record(&CacheKey::new("b", "scaling"), &raw).unwrap_err();
        assert!(matches!(err, CacheError::Corrupted { .. }));
    }
}
