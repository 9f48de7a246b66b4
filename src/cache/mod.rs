//! Cache-aside storage of upstream datasets in the shared document store.
//!
//! Each entry lives at `cache/{key}` as `{"data": ..., "timestamp": ms}`.
//! An entry is served only while `now - timestamp < ttl`; anything older,
//! malformed, or unreadable is a miss. A miss is never an error.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::errors::AppError;
use crate::kv::{paths, RemoteKv, SwapResult};

/// Default time-to-live for cached datasets.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A cached payload with the time it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    pub timestamp: i64,
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub removed: usize,
}

/// Read-through cache with a fixed TTL.
///
/// A different TTL needs a separate instance; there is no per-call override.
pub struct CacheStore {
    kv: Arc<dyn RemoteKv>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl CacheStore {
    pub fn new(kv: Arc<dyn RemoteKv>, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(kv, clock, DEFAULT_TTL)
    }

    pub fn with_ttl(kv: Arc<dyn RemoteKv>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            kv,
            clock,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms as u64)
    }

    fn is_fresh(&self, timestamp: i64, now: i64) -> bool {
        now.saturating_sub(timestamp) < self.ttl_ms
    }

    /// Get the payload for `key` if a fresh entry exists.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if !valid_key(key) {
            tracing::warn!("Ignoring cache read for invalid key {:?}", key);
            return None;
        }

        let doc = match self.kv.get(&paths::cache(key)).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                tracing::debug!("Cache miss (key: {})", key);
                return None;
            }
            Err(e) => {
                tracing::warn!("Cache read failed for {}, treating as miss: {}", key, e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_value(doc.value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Malformed cache entry for {}: {}", key, e);
                return None;
            }
        };

        if self.is_fresh(entry.timestamp, self.clock.now_ms()) {
            tracing::debug!("Cache hit (key: {})", key);
            Some(entry.data)
        } else {
            tracing::debug!("Cache entry expired (key: {})", key);
            None
        }
    }

    /// Overwrite the entry for `key`, stamping it with the current time.
    ///
    /// Failures are logged here; callers may ignore them and simply miss on
    /// the next read.
    pub async fn put(&self, key: &str, payload: Value) -> Result<(), AppError> {
        if !valid_key(key) {
            return Err(AppError::Validation(format!("Invalid cache key {:?}", key)));
        }

        let entry = CacheEntry {
            data: payload,
            timestamp: self.clock.now_ms(),
        };
        let value = serde_json::to_value(&entry)?;

        match self.kv.set(&paths::cache(key), value).await {
            Ok(()) => {
                tracing::info!("Cached dataset (key: {})", key);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to cache dataset {}: {}", key, e);
                Err(e.into())
            }
        }
    }

    /// Delete every expired or malformed entry.
    ///
    /// Each delete is conditional on the version that was examined, so an
    /// entry rewritten by a concurrent `put` survives.
    pub async fn sweep(&self) -> SweepReport {
        let entries = match self.kv.list(paths::CACHE_ROOT).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cache sweep could not list entries: {}", e);
                return SweepReport::default();
            }
        };

        let now = self.clock.now_ms();
        let mut report = SweepReport::default();

        for (path, doc) in entries {
            report.examined += 1;

            let expired = match doc.value.get("timestamp").and_then(Value::as_i64) {
                Some(timestamp) => !self.is_fresh(timestamp, now),
                None => true,
            };
            if !expired {
                continue;
            }

            match self.kv.compare_and_swap(&path, Some(doc.version), None).await {
                Ok(SwapResult::Swapped(_)) => {
                    tracing::info!("Removed expired cache entry {}", path);
                    report.removed += 1;
                }
                Ok(SwapResult::Mismatch(_)) => {
                    tracing::debug!("Cache entry {} changed during sweep, keeping it", path);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove expired cache entry {}: {}", path, e);
                }
            }
        }

        report
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains('/')
}
