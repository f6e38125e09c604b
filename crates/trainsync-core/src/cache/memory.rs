//! In-process cache store.

use super::{CacheError, CacheKey, CacheRecord, CacheStore, RawEntries, decode_record, encode_record, entry_keys};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<RwLock<RawEntries>>,
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Backend("cache lock poisoned".to_string())
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an arbitrary JSON value under `key`, bypassing record encoding.
    pub fn put_raw(&self, key: &CacheKey, value: serde_json::Value) -> Result<(), CacheError> {
        self.entries.write().map_err(poisoned)?.insert(key.to_storage_key(), value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
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
        Ok(self.entries.write().map_err(poisoned)?.remove(&key.to_storage_key()).is_some())
    }

    fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entry_keys(&entries).0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::record;
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryCacheStore::new();
        let rec = record("ds1", "missing_values", 1, "2024-01-01T00:00:00Z");
        store.put(&rec).unwrap();
        assert_eq!(store.get(&rec.key()).unwrap(), Some(rec.clone()));
        assert!(store.delete(&rec.key()).unwrap());
        assert!(!store.delete(&rec.key()).unwrap());
        assert!(store.get(&rec.key()).unwrap().is_none());
    }

    #[test]
    fn test_keys_for_dataset_filters() {
        let store = MemoryCacheStore::new();
        store.put(&record("a", "scaling", 1, "2024-01-01T00:00:00Z")).unwrap();
        store.put(&record("a", "encoding", 2, "2024-01-01T00:00:00Z")).unwrap();
        store.put(&record("b", "scaling", 3, "2024-01-01T00:00:00Z")).unwrap();
        let keys = store.keys_for_dataset("a").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.dataset_id == "a"));
    }

    #[test]
    fn test_corrupted_entry_is_reported() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new("a", "scaling");
        store.put_raw(&key, serde_json::json!({"executed": "maybe"})).unwrap();
        assert!(matches!(store.get(&key), Err(CacheError::Corrupted { .. })));
        assert_eq!(store.keys().unwrap(), vec![key]);
    }
}
