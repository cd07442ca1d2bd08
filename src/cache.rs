//! Bounded LRU cache with optional persistence.
//!
//! Each cache is named by a namespace; saving writes the whole cache, from
//! least to most recently used, into the store slot of that namespace.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, ErrorContext, Result};

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

// ============================================================================
// Key-Value Store
// ============================================================================

/// Durable string slots.
pub trait KeyValueStore: Send + Sync {
    fn read(&self, slot: &str) -> Result<Option<String>>;
    fn write(&self, slot: &str, value: &str) -> Result<()>;
    fn remove(&self, slot: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, slot: &str) -> Result<Option<String>> {
        Ok(self.slots.lock().get(slot).cloned())
    }

    fn write(&self, slot: &str, value: &str) -> Result<()> {
        self.slots.lock().insert(slot.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<()> {
        self.slots.lock().remove(slot);
        Ok(())
    }
}

/// One JSON file per slot inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).context(format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self, slot: &str) -> Result<PathBuf> {
        let valid = !slot.is_empty()
            && slot
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !slot.starts_with('.');
        if !valid {
            return Err(AppError::validation(format!("invalid store slot name: {:?}", slot)));
        }
        Ok(self.dir.join(format!("{}.json", slot)))
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, slot: &str) -> Result<Option<String>> {
        let path = self.path(slot)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context(format!("reading {}", path.display())),
        }
    }

    fn write(&self, slot: &str, value: &str) -> Result<()> {
        let path = self.path(slot)?;
        std::fs::write(&path, value).context(format!("writing {}", path.display()))
    }

    fn remove(&self, slot: &str) -> Result<()> {
        let path = self.path(slot)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context(format!("removing {}", path.display())),
        }
    }
}

// ============================================================================
// Namespaced Cache
// ============================================================================

pub struct NamespacedCache<V> {
    namespace: String,
    entries: Mutex<LruCache<String, V>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl<V> NamespacedCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    pub fn new(namespace: impl Into<String>, capacity: NonZeroUsize) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Mutex::new(LruCache::new(capacity)),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns a copy of the value and marks the key most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Inserts or replaces the value and marks the key most recently used.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.lock();
        self.push(&mut entries, key.into(), value);
    }

    /// Read-modify-write under one lock: `apply` gets the current value (the
    /// default when absent), the result is stored as most recently used and a
    /// copy is returned.
    pub fn update<F>(&self, key: impl Into<String>, apply: F) -> V
    where
        V: Default,
        F: FnOnce(&mut V),
    {
        let key = key.into();
        let mut entries = self.entries.lock();
        let mut value = entries.pop(&key).unwrap_or_default();
        apply(&mut value);
        self.push(&mut entries, key, value.clone());
        value
    }

    fn push(&self, entries: &mut LruCache<String, V>, key: String, value: V) {
        if let Some((evicted, _)) = entries.push(key.clone(), value) {
            if evicted != key {
                log::debug!("cache {}: evicted {}", self.namespace, evicted);
            }
        }
    }

    pub fn clear(&self, key: &str) -> Option<V> {
        self.entries.lock().pop(key)
    }

    /// Empties the cache and its persisted slot.
    pub fn clear_all(&self) -> Result<()> {
        self.entries.lock().clear();
        if let Some(store) = &self.store {
            store.remove(&self.namespace)?;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot: Vec<(String, V)> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .rev()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        let serialized = serde_json::to_string(&snapshot)?;
        store.write(&self.namespace, &serialized)?;
        log::debug!("cache {}: saved {} entries", self.namespace, snapshot.len());
        Ok(())
    }

    /// Restores entries saved by [`save`](Self::save), keeping their recency
    /// order. Returns the number of entries read.
    pub fn load(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let Some(serialized) = store.read(&self.namespace)? else {
            return Ok(0);
        };
        let snapshot: Vec<(String, V)> = serde_json::from_str(&serialized)
            .context(format!("loading cache {}", self.namespace))?;
        let count = snapshot.len();
        let mut entries = self.entries.lock();
        for (key, value) in snapshot {
            entries.put(key, value);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> NamespacedCache<String> {
        NamespacedCache::new("test", NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_update_is_atomic_per_key() {
        let cache: NamespacedCache<Vec<usize>> =
            NamespacedCache::new("test", NonZeroUsize::new(4).unwrap());
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let cache = &cache;
                scope.spawn(move || {
                    for n in 0..50 {
                        cache.update("shared", |items| items.push(worker * 100 + n));
                    }
                });
            }
        });
        assert_eq!(cache.get("shared").map(|items| items.len()), Some(400));
    }

    #[test]
    fn test_update_inserts_default_and_promotes() {
        let cache = cache(2);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        assert_eq!(cache.update("a", |value| value.push('!')), "1!");
        assert_eq!(cache.update("c", |value| value.push_str("new")), "new");

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1!".to_string()));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = cache(2);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string());

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some("2".to_string()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_promotes() {
        let cache = cache(2);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        assert!(cache.get("a").is_some());
        cache.set("c", "3".to_string());

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1".to_string()));
    }

    #[test]
    fn test_set_promotes_existing_key() {
        let cache = cache(2);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("a", "updated".to_string());
        cache.set("c", "3".to_string());

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("updated".to_string()));
    }

    #[test]
    fn test_clear_and_clear_all() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = cache(4).with_store(store.clone());
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.save().unwrap();

        assert_eq!(cache.clear("a"), Some("1".to_string()));
        assert_eq!(cache.clear("a"), None);

        cache.clear_all().unwrap();
        assert!(cache.is_empty());
        assert_eq!(store.read("test").unwrap(), None);
    }

    #[test]
    fn test_save_and_load_keep_recency() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let original = cache(2).with_store(store.clone());
        original.set("a", "1".to_string());
        original.set("b", "2".to_string());
        original.get("a");
        original.save().unwrap();

        let restored = cache(2).with_store(store);
        assert_eq!(restored.load().unwrap(), 2);
        restored.set("c", "3".to_string());
        assert_eq!(restored.get("b"), None);
        assert_eq!(restored.get("a"), Some("1".to_string()));
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first: NamespacedCache<u32> =
            NamespacedCache::new("first", NonZeroUsize::new(4).unwrap()).with_store(store.clone());
        let second: NamespacedCache<u32> =
            NamespacedCache::new("second", NonZeroUsize::new(4).unwrap()).with_store(store);
        first.set("k", 1);
        first.save().unwrap();

        assert_eq!(second.load().unwrap(), 0);
        assert_eq!(second.get("k"), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache")).unwrap();
        assert_eq!(store.read("slot").unwrap(), None);

        store.write("slot", "[]").unwrap();
        assert_eq!(store.read("slot").unwrap(), Some("[]".to_string()));

        store.remove("slot").unwrap();
        store.remove("slot").unwrap();
        assert_eq!(store.read("slot").unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_path_like_slots() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.write("../escape", "x").is_err());
        assert!(store.write("", "x").is_err());
    }
}
