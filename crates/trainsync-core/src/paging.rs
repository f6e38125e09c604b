//! Bounded page windows over large remote collections.

use crate::error::{SyncError, SyncResult};
use crate::registry::{DatasetRegistry, PreviewRow};
use serde::Serialize;
use tracing::{debug, warn};

pub const MAX_PAGE_SIZE: u32 = 1000;

/// A validated `(page, page_size)` pair. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    page: u32,
    page_size: u32,
}

impl PageWindow {
    pub fn new(page: u32, page_size: u32) -> SyncResult<Self> {
        if page < 1 || page_size < 1 || page_size > MAX_PAGE_SIZE {
            return Err(SyncError::InvalidPageWindow { page, page_size });
        }
        Ok(Self { page, page_size })
    }

    pub fn page(self) -> u32 {
        self.page
    }

    pub fn page_size(self) -> u32 {
        self.page_size
    }

    /// Index of the first item in the window.
    pub fn offset(self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// `ceil(total_items / page_size)`, never less than 1.
pub fn total_pages(total_items: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = total_items.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

pub fn next(current: u32, total_pages: u32) -> Option<u32> {
    (current >= 1 && current < total_pages).then(|| current + 1)
}

pub fn previous(current: u32) -> Option<u32> {
    (current > 1).then(|| current - 1)
}

pub fn go_to(target: u32, total_pages: u32) -> Option<u32> {
    (1..=total_pages.max(1)).contains(&target).then_some(target)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
    /// Column names when the items are rows.
    pub columns: Vec<String>,
}

impl<T> Page<T> {
    pub fn window(&self) -> Option<PageWindow> {
        PageWindow::new(self.page, self.page_size).ok()
    }

    pub fn next_window(&self) -> Option<PageWindow> {
        next(self.page, self.total_pages).and_then(|p| PageWindow::new(p, self.page_size).ok())
    }

    pub fn previous_window(&self) -> Option<PageWindow> {
        previous(self.page).and_then(|p| PageWindow::new(p, self.page_size).ok())
    }

    pub fn window_at(&self, target: u32) -> Option<PageWindow> {
        go_to(target, self.total_pages).and_then(|p| PageWindow::new(p, self.page_size).ok())
    }
}

/// Build a preview page from a raw response, substituting empty
/// collections for absent or mistyped fields.
pub fn normalize_preview(raw: &serde_json::Value, window: PageWindow) -> Page<PreviewRow> {
    let columns: Vec<String> = match raw.get("columns") {
        Some(serde_json::Value::Array(cols)) => cols
            .iter()
            .map(|c| c.as_str().map_or_else(|| c.to_string(), str::to_string))
            .collect(),
        other => {
            if other.is_some() {
                warn!("preview columns have unexpected type, substituting empty list");
            }
            Vec::new()
        }
    };

    let items: Vec<PreviewRow> = match raw.get("rows").or_else(|| raw.get("data")) {
        Some(serde_json::Value::Array(rows)) => rows
            .iter()
            .filter_map(|row| match row {
                serde_json::Value::Array(cells) => Some(cells.clone()),
                serde_json::Value::Object(map) => Some(
                    columns
                        .iter()
                        .map(|c| map.get(c).cloned().unwrap_or(serde_json::Value::Null))
                        .collect(),
                ),
                _ => None,
            })
            .collect(),
        other => {
            if other.is_some() {
                warn!("preview rows have unexpected type, substituting empty list");
            }
            Vec::new()
        }
    };

    let total_items = raw
        .get("totalRows")
        .or_else(|| raw.get("total_rows"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or_else(|| window.offset() + items.len() as u64);

    let computed = total_pages(total_items, window.page_size());
    let remote = raw
        .get("totalPages")
        .or_else(|| raw.get("total_pages"))
        .and_then(serde_json::Value::as_u64)
        .and_then(|p| u32::try_from(p).ok());
    if remote.is_some_and(|r| r != computed) {
        debug!(remote = ?remote, computed, "remote page count disagrees, using computed value");
    }

    Page {
        items,
        page: window.page(),
        page_size: window.page_size(),
        total_items,
        total_pages: computed,
        columns,
    }
}

/// Validate the window locally, then fetch one preview page.
pub async fn fetch<R>(registry: &R, dataset_id: &str, page: u32, page_size: u32) -> SyncResult<Page<PreviewRow>>
where
    R: DatasetRegistry + ?Sized,
{
    let window = PageWindow::new(page, page_size)?;
    registry.preview(dataset_id, window).await
}
