//! Command implementations for the TrainSync CLI.

pub mod cache;
pub mod jobs;
pub mod preview;
pub mod render;
pub mod types;
pub mod watch;

use std::sync::Arc;
use tracing::{info, warn};
use trainsync_client::{JobControlClient, RegistryClient};
use trainsync_core::{CacheReconciler, FileCacheStore, ReconcileReport, SyncConfig, SyncError, SyncResult};

/// Resolved configuration plus constructors for the service clients.
pub struct Context {
    pub config: SyncConfig,
}

impl Context {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn jobs(&self) -> SyncResult<JobControlClient> {
        JobControlClient::new(&self.config.base_url, self.config.request_timeout)
    }

    pub fn registry(&self) -> SyncResult<RegistryClient> {
        RegistryClient::new(&self.config.base_url, self.config.request_timeout)
    }

    pub fn cache_store(&self) -> SyncResult<Arc<FileCacheStore>> {
        FileCacheStore::open(self.config.cache_path.clone())
            .map(Arc::new)
            .map_err(SyncError::from)
    }

    /// Open the step cache and prune it against the registry first, so
    /// callers only ever read validated records.
    pub async fn reconciled_cache(&self) -> SyncResult<(Arc<FileCacheStore>, ReconcileReport)> {
        let store = self.cache_store()?;
        let reconciler = CacheReconciler::new(store.clone(), Arc::new(self.registry()?));
        let report = reconciler.run().await?;
        if !report.is_noop() {
            info!(deleted = report.deleted(), "pruned step cache");
        }
        Ok((store, report))
    }

    /// Reconcile on a switch to `dataset_id`. Failures are logged and the
    /// command carries on.
    pub async fn enter_dataset(&self, dataset_id: &str) {
        if let Err(e) = self.reconciled_cache().await {
            warn!(dataset_id, error = %e, "step cache reconciliation failed");
        }
    }
}
