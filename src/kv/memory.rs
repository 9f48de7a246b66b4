use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{KvChange, KvError, RemoteKv, Result, SwapResult, Versioned, CHANGE_FEED_CAPACITY};

/// An in-memory implementation of `RemoteKv`, intended primarily for testing.
///
/// Reads and writes can be made to fail on demand to exercise the degraded
/// paths of the components built on top of it.
pub struct MemoryKv {
    documents: RwLock<HashMap<String, Versioned>>,
    next_version: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    changes: broadcast::Sender<KvChange>,
}

impl MemoryKv {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            documents: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            changes,
        }
    }

    /// Make every subsequent read fail until switched back off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn publish(&self, path: &str, value: Option<Value>, version: u64) {
        // No watchers is fine
        let _ = self.changes.send(KvChange {
            path: path.to_string(),
            value,
            version,
        });
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteKv for MemoryKv {
    async fn get(&self, path: &str) -> Result<Option<Versioned>> {
        self.check_read()?;
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.check_write()?;
        let version = {
            let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
            let version = self.bump();
            documents.insert(
                path.to_string(),
                Versioned {
                    value: value.clone(),
                    version,
                },
            );
            version
        };
        self.publish(path, Some(value), version);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.check_write()?;
        let removed = {
            let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
            documents.remove(path).map(|_| self.bump())
        };
        match removed {
            Some(version) => {
                self.publish(path, None, version);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Versioned)>> {
        self.check_read()?;
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, Versioned)> = documents
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, doc)| (path.clone(), doc.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<u64>,
        new_value: Option<Value>,
    ) -> Result<SwapResult> {
        self.check_write()?;
        let version = {
            let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
            let current = documents.get(path);

            let matches = match (current, expected) {
                (None, None) => true,
                (Some(doc), Some(version)) => doc.version == version,
                _ => false,
            };
            if !matches {
                return Ok(SwapResult::Mismatch(current.cloned()));
            }

            match (&new_value, current.is_some()) {
                (Some(value), _) => {
                    let version = self.bump();
                    documents.insert(
                        path.to_string(),
                        Versioned {
                            value: value.clone(),
                            version,
                        },
                    );
                    Some(version)
                }
                (None, true) => {
                    documents.remove(path);
                    Some(self.bump())
                }
                // Expected absent and still absent
                (None, false) => None,
            }
        };
        if let Some(version) = version {
            self.publish(path, new_value, version);
        }
        Ok(SwapResult::Swapped(version))
    }

    fn watch(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let kv = MemoryKv::new();
        assert!(kv.get("users/u1").await.unwrap().is_none());

        kv.set("users/u1", json!({"name": "Ann"})).await.unwrap();
        let doc = kv.get("users/u1").await.unwrap().unwrap();
        assert_eq!(doc.value, json!({"name": "Ann"}));
    }

    #[tokio::test]
    async fn test_versions_increase_on_every_write() {
        let kv = MemoryKv::new();
        kv.set("a", json!(1)).await.unwrap();
        let first = kv.get("a").await.unwrap().unwrap().version;
        kv.set("a", json!(2)).await.unwrap();
        let second = kv.get("a").await.unwrap().unwrap().version;
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let kv = MemoryKv::new();

        // Create only if absent
        let result = kv.compare_and_swap("a", None, Some(json!(1))).await.unwrap();
        assert!(matches!(result, SwapResult::Swapped(Some(_))));
        let result = kv.compare_and_swap("a", None, Some(json!(2))).await.unwrap();
        assert!(matches!(result, SwapResult::Mismatch(Some(_))));

        let version = kv.get("a").await.unwrap().unwrap().version;

        // Stale version is rejected
        let result = kv
            .compare_and_swap("a", Some(version + 100), Some(json!(3)))
            .await
            .unwrap();
        assert!(matches!(result, SwapResult::Mismatch(Some(_))));

        // Current version deletes
        let result = kv.compare_and_swap("a", Some(version), None).await.unwrap();
        assert_eq!(result, SwapResult::Swapped(Some(version + 1)));
        assert!(kv.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let kv = MemoryKv::new();
        kv.set("cache/a", json!(1)).await.unwrap();
        kv.set("cache/b", json!(2)).await.unwrap();
        kv.set("users/u1", json!({})).await.unwrap();

        let entries = kv.list("cache/").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["cache/a", "cache/b"]);
    }

    #[tokio::test]
    async fn test_watch_sees_writes_and_deletes() {
        let kv = MemoryKv::new();
        let mut rx = kv.watch();

        kv.set("a", json!(1)).await.unwrap();
        kv.delete("a").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            KvChange {
                path: "a".to_string(),
                value: Some(json!(1)),
                version: 1,
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            KvChange {
                path: "a".to_string(),
                value: None,
                version: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let kv = MemoryKv::new();
        kv.set_fail_writes(true);
        assert!(kv.set("a", json!(1)).await.is_err());
        kv.set_fail_writes(false);
        kv.set("a", json!(1)).await.unwrap();

        kv.set_fail_reads(true);
        assert!(kv.get("a").await.is_err());
        assert!(kv.list("").await.is_err());
    }
}
