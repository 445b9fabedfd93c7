//! Control-plane key-value store.
//!
//! Namespaced get/set/get-all storage with one addition the ledgers
//! depend on: an atomic `set_if_absent`. The original design accepted a
//! check-then-write race on the used-payment set; requiring the
//! conditional write from the store closes it, because reservation and
//! existence check become one operation.
//!
//! The in-memory implementation uses DashMap for concurrent access and
//! persists each namespace to a JSON file when a data directory is
//! configured, the same pattern the discovery store uses.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::StoreError;

/// Namespaced key-value storage.
///
/// Implementations may be eventually consistent for `get`/`get_all`,
/// but `set_if_absent` must be atomic per key: of two concurrent calls
/// with the same key, exactly one returns `true`.
#[async_trait]
pub trait ControlPlaneStore: Send + Sync {
    /// Fetch a value, `None` if absent.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value unconditionally.
    async fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), StoreError>;

    /// Write a value only if the key is absent. Returns `true` if the
    /// write happened, `false` if the key was already present.
    async fn set_if_absent(
        &self,
        namespace: &str,
        key: &str,
        value: String,
    ) -> Result<bool, StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError>;

    /// Fetch every key/value pair in a namespace.
    async fn get_all(&self, namespace: &str) -> Result<HashMap<String, String>, StoreError>;
}

/// In-memory control-plane store with optional JSON file persistence.
#[derive(Clone)]
pub struct MemoryStore {
    /// namespace → key → value
    spaces: Arc<DashMap<String, HashMap<String, String>>>,
    /// Directory for persistence. None = in-memory only.
    data_dir: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a store. When `data_dir` is set, each namespace is
    /// persisted to `{data_dir}/control/{namespace}.json`.
    pub fn new(data_dir: Option<&str>) -> Self {
        Self {
            spaces: Arc::new(DashMap::new()),
            data_dir: data_dir.map(|d| PathBuf::from(d).join("control")),
        }
    }

    /// Load persisted namespaces from disk. Returns the number of
    /// entries loaded.
    pub fn load_from_disk(&self) -> usize {
        let dir = match &self.data_dir {
            Some(d) => d,
            None => return 0,
        };
        if !dir.exists() {
            return 0;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read control store directory");
                return 0;
            }
        };

        let mut count = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let namespace = stem.replace('_', ":");

            match std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(&raw).ok())
            {
                Some(map) => {
                    count += map.len();
                    self.spaces.insert(namespace, map);
                }
                None => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable control store file");
                }
            }
        }
        count
    }

    fn persist(&self, namespace: &str, map: &HashMap<String, String>) {
        let Some(dir) = &self.data_dir else { return };
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::error!(error = %e, "Failed to create control store directory");
            return;
        }
        // ':' is not a safe filename character on every platform
        let path = dir.join(format!("{}.json", namespace.replace(':', "_")));
        match serde_json::to_string(map) {
            Ok(json) => {
                let tmp = path.with_extension("json.tmp");
                if std::fs::write(&tmp, json)
                    .and_then(|_| std::fs::rename(&tmp, &path))
                    .is_err()
                {
                    tracing::error!(path = %path.display(), "Failed to persist control namespace");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode control namespace"),
        }
    }
}

#[async_trait]
impl ControlPlaneStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .spaces
            .get(namespace)
            .and_then(|ns| ns.get(key).cloned()))
    }

    async fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), StoreError> {
        let mut ns = self.spaces.entry(namespace.to_string()).or_default();
        ns.insert(key.to_string(), value);
        self.persist(namespace, &ns);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        namespace: &str,
        key: &str,
        value: String,
    ) -> Result<bool, StoreError> {
        // The entry guard holds the shard lock for this namespace, so
        // the contains/insert pair below is atomic per key.
        let mut ns = self.spaces.entry(namespace.to_string()).or_default();
        if ns.contains_key(key) {
            return Ok(false);
        }
        ns.insert(key.to_string(), value);
        self.persist(namespace, &ns);
        Ok(true)
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        if let Some(mut ns) = self.spaces.get_mut(namespace) {
            ns.remove(key);
            self.persist(namespace, &ns);
        }
        Ok(())
    }

    async fn get_all(&self, namespace: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .spaces
            .get(namespace)
            .map(|ns| ns.clone())
            .unwrap_or_default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let store = MemoryStore::new(None);
        store.set("ns", "k", "v".into()).await.unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("ns", "missing").await.unwrap(), None);
        assert_eq!(store.get("other", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_reserves_once() {
        let store = MemoryStore::new(None);
        assert!(store.set_if_absent("refs", "0xabc", "pending".into()).await.unwrap());
        assert!(!store.set_if_absent("refs", "0xabc", "pending".into()).await.unwrap());
        // The original value survives the losing attempt
        assert_eq!(
            store.get("refs", "0xabc").await.unwrap().as_deref(),
            Some("pending")
        );
    }

    #[tokio::test]
    async fn test_set_if_absent_concurrent_single_winner() {
        let store = Arc::new(MemoryStore::new(None));
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .set_if_absent("refs", "0xsame", format!("claim-{}", i))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_remove_then_reserve_again() {
        let store = MemoryStore::new(None);
        assert!(store.set_if_absent("refs", "0xabc", "pending".into()).await.unwrap());
        store.remove("refs", "0xabc").await.unwrap();
        assert!(store.set_if_absent("refs", "0xabc", "pending".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_all() {
        let store = MemoryStore::new(None);
        store.set("ns", "a", "1".into()).await.unwrap();
        store.set("ns", "b", "2".into()).await.unwrap();
        let all = store.get_all("ns").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], "1");
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let store = MemoryStore::new(Some(path));
        store.set("cleanup:index", "k", "v".into()).await.unwrap();

        let reloaded = MemoryStore::new(Some(path));
        assert_eq!(reloaded.load_from_disk(), 1);
        assert_eq!(
            reloaded.get("cleanup:index", "k").await.unwrap().as_deref(),
            Some("v")
        );
    }
}
