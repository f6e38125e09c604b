//! Dataset registry over REST: existence checks, preprocessing history and
//! paginated previews.

use crate::http::{HttpService, decode_json};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use trainsync_core::paging::normalize_preview;
use trainsync_core::{DatasetRegistry, Page, PageWindow, PreprocessingStep, PreviewRow, SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: HttpService,
}

impl RegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        Ok(Self { http: HttpService::new(base_url, timeout)? })
    }

    /// Validate `(page, page_size)` locally, then fetch that preview page.
    pub async fn fetch_preview(&self, dataset_id: &str, page: u32, page_size: u32) -> SyncResult<Page<PreviewRow>> {
        trainsync_core::paging::fetch(self, dataset_id, page, page_size).await
    }
}

#[async_trait]
impl DatasetRegistry for RegistryClient {
    async fn dataset_exists(&self, dataset_id: &str) -> SyncResult<bool> {
        let request = self.http.get(&["datasets", dataset_id])?;
        match self.http.send(request, "dataset_exists").await {
            Ok(_) => Ok(true),
            Err(SyncError::RemoteRejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!(dataset_id, "dataset not found");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn preprocessing_steps(&self, dataset_id: &str) -> SyncResult<Vec<PreprocessingStep>> {
        let request = self.http.get(&["datasets", dataset_id, "preprocessing"])?;
        let steps: Vec<PreprocessingStep> = self.http.send_json(request, "preprocessing_steps").await?;
        debug!(dataset_id, count = steps.len(), "fetched preprocessing history");
        Ok(steps)
    }

    async fn preview(&self, dataset_id: &str, window: PageWindow) -> SyncResult<Page<PreviewRow>> {
        let request = self
            .http
            .get(&["datasets", dataset_id, "preview"])?
            .query(&[("page", window.page()), ("page_size", window.page_size())]);
        let response = self.http.send(request, "preview").await?;
        let raw: serde_json::Value = decode_json(response, "preview").await?;
        let page = normalize_preview(&raw, window);
        debug!(
            dataset_id,
            page = page.page,
            rows = page.items.len(),
            total_pages = page.total_pages,
            "fetched preview page"
        );
        Ok(page)
    }
}
