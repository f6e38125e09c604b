use super::{CacheError, CacheKey, CacheStore};
use crate::error::SyncResult;
use crate::registry::DatasetRegistry;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Entries deleted because they no longer deserialize.
    pub corrupted: Vec<CacheKey>,
    /// Entries deleted because their dataset is gone.
    pub removed: Vec<CacheKey>,
    /// Datasets confirmed present.
    pub confirmed: Vec<String>,
    /// Datasets whose check failed, with the reason. Their entries were kept.
    pub unchecked: Vec<(String, String)>,
    /// Datasets confirmed gone whose entries could not all be deleted.
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn deleted(&self) -> usize {
        self.corrupted.len() + self.removed.len()
    }

    pub fn is_noop(&self) -> bool {
        self.deleted() == 0
    }
}

/// Prunes cached step records against the remote dataset registry.
///
/// Deletes only. Run at start-up and whenever the active dataset changes;
/// repeated runs converge.
pub struct CacheReconciler {
    store: Arc<dyn CacheStore>,
    registry: Arc<dyn DatasetRegistry>,
}

impl CacheReconciler {
    pub fn new(store: Arc<dyn CacheStore>, registry: Arc<dyn DatasetRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn run(&self) -> SyncResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let keys = self.store.keys()?;
        if keys.is_empty() {
            debug!("step cache empty, nothing to reconcile");
            return Ok(report);
        }

        let mut datasets = BTreeSet::new();
        for key in keys {
            match self.store.get(&key) {
                Ok(Some(_)) => {
                    datasets.insert(key.dataset_id.clone());
                }
                Ok(None) => {}
                Err(CacheError::Corrupted { reason, .. }) => {
                    warn!(dataset_id = %key.dataset_id, step_type = %key.step_type, %reason, "deleting corrupted cache entry");
                    match self.store.delete(&key) {
                        Ok(true) => report.corrupted.push(key),
                        Ok(false) => {}
                        Err(e) => report.failed.push((key.dataset_id.clone(), e.to_string())),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let registry = &self.registry;
        let checks = datasets.into_iter().map(|dataset_id| async move {
            let outcome = registry.dataset_exists(&dataset_id).await;
            (dataset_id, outcome)
        });

        for (dataset_id, outcome) in join_all(checks).await {
            match outcome {
                Ok(true) => report.confirmed.push(dataset_id),
                Ok(false) => match self.clear_dataset(&dataset_id, &mut report.removed) {
                    Ok(()) => info!(dataset_id = %dataset_id, "dataset gone, cleared its cached steps"),
                    Err(e) => {
                        warn!(dataset_id = %dataset_id, error = %e, "failed to clear cached steps");
                        report.failed.push((dataset_id, e.to_string()));
                    }
                },
                Err(e) => {
                    warn!(dataset_id = %dataset_id, error = %e, "existence check failed, keeping cached steps");
                    report.unchecked.push((dataset_id, e.to_string()));
                }
            }
        }

        info!(
            corrupted = report.corrupted.len(),
            removed = report.removed.len(),
            confirmed = report.confirmed.len(),
            unchecked = report.unchecked.len(),
            failed = report.failed.len(),
            "step cache reconciled"
        );
        Ok(report)
    }

    /// Delete every entry of `dataset_id`, attempting all keys before
    /// reporting the first failure.
    fn clear_dataset(&self, dataset_id: &str, removed: &mut Vec<CacheKey>) -> Result<(), CacheError> {
        let mut first_error = None;
        for key in self.store.keys_for_dataset(dataset_id)? {
            match self.store.delete(&key) {
                Ok(true) => removed.push(key),
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CacheRecord, MemoryCacheStore};
    use super::super::test_support::record;
    use super::*;
    use crate::error::SyncError;
    use crate::paging::{Page, PageWindow};
    use crate::registry::{PreprocessingStep, PreviewRow};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Remote {
        Present,
        Absent,
        Failing,
    }

    struct FakeRegistry {
        datasets: HashMap<String, Remote>,
        checked: Mutex<Vec<String>>,
    }

    impl FakeRegistry {
        fn new(entries: &[(&str, Remote)]) -> Arc<Self> {
            Arc::new(Self {
                datasets: entries.iter().map(|(id, r)| ((*id).to_string(), *r)).collect(),
                checked: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DatasetRegistry for FakeRegistry {
        async fn dataset_exists(&self, dataset_id: &str) -> SyncResult<bool> {
            self.checked.lock().unwrap().push(dataset_id.to_string());
            match self.datasets.get(dataset_id).copied().unwrap_or(Remote::Absent) {
                Remote::Present => Ok(true),
                Remote::Absent => Ok(false),
                Remote::Failing => Err(SyncError::ServiceUnavailable("connection refused".to_string())),
            }
        }

        async fn preprocessing_steps(&self, _dataset_id: &str) -> SyncResult<Vec<PreprocessingStep>> {
            Ok(Vec::new())
        }

        async fn preview(&self, _dataset_id: &str, _window: PageWindow) -> SyncResult<Page<PreviewRow>> {
            unreachable!()
        }
    }

    fn seeded() -> Arc<MemoryCacheStore> {
        let store = Arc::new(MemoryCacheStore::new());
        for (ds, step) in [("A", "missing_values"), ("A", "feature_scaling"), ("B", "missing_values"), ("B", "encoding")] {
            store.put(&record(ds, step, 1, "2024-01-01T00:00:00Z")).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_absent_dataset_loses_every_step() {
        let store = seeded();
        let registry = FakeRegistry::new(&[("B", Remote::Present)]);
        let reconciler = CacheReconciler::new(store.clone(), registry.clone());

        let report = reconciler.run().await.unwrap();

        assert!(store.keys_for_dataset("A").unwrap().is_empty());
        assert_eq!(store.keys_for_dataset("B").unwrap().len(), 2);
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.confirmed, vec!["B".to_string()]);

        let mut checked = registry.checked.lock().unwrap().clone();
        checked.sort();
        assert_eq!(checked, vec!["A", "B"], "one check per distinct dataset");
    }

    #[tokio::test]
    async fn test_corrupted_entry_deleted_without_remote_check() {
        let store = Arc::new(MemoryCacheStore::new());
        store.put_raw(&CacheKey::new("C", "encoding"), serde_json::json!({"bogus": true})).unwrap();
        let registry = FakeRegistry::new(&[("C", Remote::Present)]);

        let report = CacheReconciler::new(store.clone(), registry.clone()).run().await.unwrap();

        assert_eq!(report.corrupted, vec![CacheKey::new("C", "encoding")]);
        assert!(store.is_empty());
        assert!(registry.checked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_check_keeps_entries_and_isolates() {
        let store = seeded();
        let registry = FakeRegistry::new(&[("A", Remote::Failing), ("B", Remote::Absent)]);

        let report = CacheReconciler::new(store.clone(), registry).run().await.unwrap();

        assert_eq!(store.keys_for_dataset("A").unwrap().len(), 2);
        assert!(store.keys_for_dataset("B").unwrap().is_empty());
        assert_eq!(report.unchecked.len(), 1);
        assert_eq!(report.unchecked[0].0, "A");
    }

    #[tokio::test]
    async fn test_empty_cache_and_repeat_runs_are_noops() {
        let empty = Arc::new(MemoryCacheStore::new());
        let registry = FakeRegistry::new(&[]);
        let report = CacheReconciler::new(empty, registry.clone()).run().await.unwrap();
        assert!(report.is_noop());
        assert!(registry.checked.lock().unwrap().is_empty());

        let store = seeded();
        let reconciler = CacheReconciler::new(store.clone(), FakeRegistry::new(&[("B", Remote::Present)]));
        reconciler.run().await.unwrap();
        let keys = store.keys().unwrap();
        let second = reconciler.run().await.unwrap();
        assert!(second.is_noop());
        assert_eq!(store.keys().unwrap(), keys);
    }

    /// Memory store whose deletes fail for one dataset.
    struct StuckStore {
        inner: MemoryCacheStore,
        stuck: &'static str,
    }

    impl CacheStore for StuckStore {
        fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, CacheError> {
            self.inner.get(key)
        }

        fn put(&self, record: &CacheRecord) -> Result<(), CacheError> {
            self.inner.put(record)
        }

        fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
            if key.dataset_id == self.stuck {
                return Err(CacheError::Backend("disk is read-only".to_string()));
            }
            self.inner.delete(key)
        }

        fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
            self.inner.keys()
        }
    }

    #[tokio::test]
    async fn test_delete_failure_is_isolated_to_its_dataset() {
        let inner = MemoryCacheStore::new();
        for (ds, step) in [("A", "missing_values"), ("B", "encoding"), ("C", "scaling")] {
            inner.put(&record(ds, step, 1, "2024-01-01T00:00:00Z")).unwrap();
        }
        let store = Arc::new(StuckStore { inner, stuck: "A" });
        let registry = FakeRegistry::new(&[("C", Remote::Present)]);

        let report = CacheReconciler::new(store.clone(), registry).run().await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "A");
        assert!(report.failed[0].1.contains("read-only"));
        assert_eq!(report.removed, vec![CacheKey::new("B", "encoding")]);
        assert_eq!(report.confirmed, vec!["C".to_string()]);
        assert_eq!(store.keys_for_dataset("A").unwrap().len(), 1);
    }
}
