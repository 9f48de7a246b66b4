//! SQLite-backed document store.
//!
//! Values are stored as JSON text. Writes are single statements guarded on
//! the stored version that return the version they took. Deletes run in a
//! transaction that also advances the version counter, so every change on
//! the feed carries a distinct, ordered version.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use crate::kv::{KvChange, RemoteKv, Result, SwapResult, Versioned, CHANGE_FEED_CAPACITY};

const NEXT_VERSION: &str = "(SELECT last_version + 1 FROM document_versions WHERE id = 1)";

/// Document store over a SQLite pool.
///
/// The change feed only reports mutations made through this handle; other
/// processes sharing the database file are not observed.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    changes: broadcast::Sender<KvChange>,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    fn publish(&self, path: &str, value: Option<Value>, version: u64) {
        let _ = self.changes.send(KvChange {
            path: path.to_string(),
            value,
            version,
        });
    }

    /// Delete `path`, optionally only at version `expected`, and take a
    /// version for the deletion. `None` if nothing was deleted.
    async fn delete_versioned(&self, path: &str, expected: Option<u64>) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await?;

        let deleted = match expected {
            Some(version) => {
                sqlx::query("DELETE FROM documents WHERE path = ? AND version = ?")
                    .bind(path)
                    .bind(version as i64)
                    .execute(&mut *tx)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM documents WHERE path = ?")
                    .bind(path)
                    .execute(&mut *tx)
                    .await?
            }
        };
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let version: i64 = sqlx::query_scalar(
            "UPDATE document_versions SET last_version = last_version + 1 WHERE id = 1 RETURNING last_version",
        )
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(version as u64))
    }
}

fn versioned_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Versioned> {
    let raw: String = row.get("value");
    let version: i64 = row.get("version");
    Ok(Versioned {
        value: serde_json::from_str(&raw)?,
        version: version as u64,
    })
}

#[async_trait]
impl RemoteKv for DocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Versioned>> {
        let row = sqlx::query("SELECT value, version FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(versioned_from_row).transpose()
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let raw = serde_json::to_string(&value)?;
        let now = Utc::now().to_rfc3339();

        let version: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO documents (path, value, version, updated_at) VALUES (?, ?, {NEXT_VERSION}, ?) \
             ON CONFLICT(path) DO UPDATE SET value = excluded.value, version = excluded.version, updated_at = excluded.updated_at \
             RETURNING version"
        ))
        .bind(path)
        .bind(&raw)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        self.publish(path, Some(value), version as u64);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        match self.delete_versioned(path, None).await? {
            Some(version) => {
                self.publish(path, None, version);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Versioned)>> {
        let rows = sqlx::query(
            "SELECT path, value, version FROM documents WHERE substr(path, 1, length(?)) = ? ORDER BY path",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, Versioned)> {
                Ok((row.get("path"), versioned_from_row(row)?))
            })
            .collect()
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<u64>,
        new_value: Option<Value>,
    ) -> Result<SwapResult> {
        let now = Utc::now().to_rfc3339();

        let written: Option<i64> = match (expected, &new_value) {
            (None, Some(value)) => {
                let raw = serde_json::to_string(value)?;
                sqlx::query_scalar(&format!(
                    "INSERT INTO documents (path, value, version, updated_at) VALUES (?, ?, {NEXT_VERSION}, ?) \
                     ON CONFLICT(path) DO NOTHING RETURNING version"
                ))
                .bind(path)
                .bind(&raw)
                .bind(&now)
                .fetch_optional(&self.pool)
                .await?
            }
            (Some(version), Some(value)) => {
                let raw = serde_json::to_string(value)?;
                sqlx::query_scalar(&format!(
                    "UPDATE documents SET value = ?, version = {NEXT_VERSION}, updated_at = ? \
                     WHERE path = ? AND version = ? RETURNING version"
                ))
                .bind(&raw)
                .bind(&now)
                .bind(path)
                .bind(version as i64)
                .fetch_optional(&self.pool)
                .await?
            }
            (Some(version), None) => self
                .delete_versioned(path, Some(version))
                .await?
                .map(|v| v as i64),
            (None, None) => {
                return Ok(match self.get(path).await? {
                    None => SwapResult::Swapped(None),
                    current => SwapResult::Mismatch(current),
                });
            }
        };

        match written {
            Some(version) => {
                let version = version as u64;
                self.publish(path, new_value, version);
                Ok(SwapResult::Swapped(Some(version)))
            }
            None => Ok(SwapResult::Mismatch(self.get(path).await?)),
        }
    }

    fn watch(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_store() -> (DocumentStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("docs.sqlite"))
            .await
            .expect("Failed to init DB");
        (DocumentStore::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (store, _dir) = open_store().await;

        assert!(store.get("users/u1").await.unwrap().is_none());
        store
            .set("users/u1", json!({"collect": {"42": true}}))
            .await
            .unwrap();

        let doc = store.get("users/u1").await.unwrap().unwrap();
        assert_eq!(doc.value, json!({"collect": {"42": true}}));
        assert!(doc.version >= 1);
    }

    #[tokio::test]
    async fn test_overwrite_bumps_version() {
        let (store, _dir) = open_store().await;

        store.set("cache/a", json!(1)).await.unwrap();
        let first = store.get("cache/a").await.unwrap().unwrap().version;
        store.set("cache/a", json!(2)).await.unwrap();
        let second = store.get("cache/a").await.unwrap().unwrap();

        assert_eq!(second.value, json!(2));
        assert!(second.version > first);
    }

    #[tokio::test]
    async fn test_compare_and_swap_guards_on_version() {
        let (store, _dir) = open_store().await;

        let created = store
            .compare_and_swap("users/u1", None, Some(json!({"n": 1})))
            .await
            .unwrap();
        assert!(matches!(created, SwapResult::Swapped(Some(_))));

        let again = store
            .compare_and_swap("users/u1", None, Some(json!({"n": 2})))
            .await
            .unwrap();
        assert!(matches!(again, SwapResult::Mismatch(Some(ref doc)) if doc.value == json!({"n": 1})));

        let version = store.get("users/u1").await.unwrap().unwrap().version;
        let updated = store
            .compare_and_swap("users/u1", Some(version), Some(json!({"n": 3})))
            .await
            .unwrap();
        assert!(matches!(updated, SwapResult::Swapped(Some(v)) if v > version));

        // The old version is now stale
        let stale = store
            .compare_and_swap("users/u1", Some(version), Some(json!({"n": 4})))
            .await
            .unwrap();
        assert!(matches!(stale, SwapResult::Mismatch(_)));
        assert_eq!(
            store.get("users/u1").await.unwrap().unwrap().value,
            json!({"n": 3})
        );
    }

    #[tokio::test]
    async fn test_recreated_document_gets_fresh_version() {
        let (store, _dir) = open_store().await;

        store.set("cache/a", json!(1)).await.unwrap();
        let old = store.get("cache/a").await.unwrap().unwrap().version;
        store.delete("cache/a").await.unwrap();
        store.set("cache/a", json!(1)).await.unwrap();

        let recreated = store.get("cache/a").await.unwrap().unwrap().version;
        assert!(recreated > old);
        let result = store.compare_and_swap("cache/a", Some(old), None).await.unwrap();
        assert!(matches!(result, SwapResult::Mismatch(Some(_))));
    }

    #[tokio::test]
    async fn test_list_only_matches_prefix() {
        let (store, _dir) = open_store().await;

        store.set("cache/animals_v1", json!([])).await.unwrap();
        store.set("cache/shelters", json!([])).await.unwrap();
        store.set("users/u1", json!({})).await.unwrap();

        let entries = store.list("cache/").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["cache/animals_v1", "cache/shelters"]);
    }

    #[tokio::test]
    async fn test_watch_reports_changes() {
        let (store, _dir) = open_store().await;
        let mut rx = store.watch();

        store.set("users/u1", json!({"a": 1})).await.unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.path, "users/u1");
        assert_eq!(change.value, Some(json!({"a": 1})));

        store.delete("users/u1").await.unwrap();
        let deleted = rx.recv().await.unwrap();
        assert_eq!(deleted.value, None);
        assert!(deleted.version > change.version);
    }

    #[tokio::test]
    async fn test_latest_change_version_matches_stored_value_under_concurrent_writers() {
        let (store, _dir) = open_store().await;
        let mut rx = store.watch();

        for round in 0..5 {
            let writers: Vec<_> = (0..4)
                .map(|writer| {
                    let store = store.clone();
                    tokio::spawn(async move {
                        store
                            .set("users/u1", json!({"round": round, "writer": writer}))
                            .await
                            .unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap();
            }
        }

        // Arrival order may differ from commit order; the highest version wins
        let mut latest: Option<KvChange> = None;
        while let Ok(change) = rx.try_recv() {
            if latest.as_ref().map_or(true, |l| change.version > l.version) {
                latest = Some(change);
            }
        }

        let latest = latest.unwrap();
        let stored = store.get("users/u1").await.unwrap().unwrap();
        assert_eq!(latest.version, stored.version);
        assert_eq!(latest.value, Some(stored.value));
    }
}
