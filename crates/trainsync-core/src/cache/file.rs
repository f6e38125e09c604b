//! JSON-file cache store.

use super::{CacheError, CacheKey, CacheRecord, CacheStore, RawEntries, decode_record, encode_record, entry_keys};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    entries: RawEntries,
}

/// Cache store persisted as one JSON document.
///
/// The whole document is rewritten on every mutation through a sibling
/// temporary file and a rename. A document that cannot be parsed at all is
/// discarded on open.
#[derive(Debug)]
pub struct FileCacheStore {
    path: PathBuf,
    entries: RwLock<RawEntries>,
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Backend("cache lock poisoned".to_string())
}

impl FileCacheStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let mut entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => RawEntries::new(),
            Ok(text) => match serde_json::from_str::<CacheFile>(&text) {
                Ok(file) => file.entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "step cache unreadable, starting empty");
                    RawEntries::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RawEntries::new(),
            Err(e) => return Err(e.into()),
        };

        let (_, invalid) = entry_keys(&entries);
        for raw in &invalid {
            warn!(path = %path.display(), key = %raw, "dropping cache entry with malformed key");
            entries.remove(raw);
        }

        debug!(path = %path.display(), entries = entries.len(), "step cache opened");
        Ok(Self { path, entries: RwLock::new(entries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store an arbitrary JSON value under `key`, bypassing record encoding.
    pub fn put_raw(&self, key: &CacheKey, value: serde_json::Value) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_storage_key(), value);
        self.persist(&entries)
    }

    fn persist(&self, entries: &RawEntries) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let doc = serde_json::json!({ "version": FORMAT_VERSION, "entries": entries });
        let text = serde_json::to_string_pretty(&doc).map_err(|e| CacheError::Backend(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, CacheError> {
        let entries = self.entries.read().map_err(poisoned)?;
        entries
            .get(&key.to_storage_key())
            .map(|raw| decode_record(key, raw))
            .transpose()
    }

    fn put(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let value = encode_record(record)?;
        self.put_raw(&record.key(), value)
    }

    fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries.remove(&key.to_storage_key()).is_none() {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entry_keys(&entries).0)
    }
}
