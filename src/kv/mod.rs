//! Remote key-value document store interface.
//!
//! Documents are arbitrary JSON values addressed by slash-separated string
//! paths (`cache/{key}`, `users/{userId}`). Every stored document carries a
//! version that increases on each write, which is what compare-and-swap is
//! checked against.

#[cfg(test)]
mod memory;

#[cfg(test)]
pub use memory::MemoryKv;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the change feed before slow watchers start lagging.
pub const CHANGE_FEED_CAPACITY: usize = 256;

/// Path helpers for the documents this service reads and writes.
pub mod paths {
    /// Prefix under which cached datasets live.
    pub const CACHE_ROOT: &str = "cache/";

    pub fn cache(key: &str) -> String {
        format!("{}{}", CACHE_ROOT, key)
    }

    pub fn user(user_id: &str) -> String {
        format!("users/{}", user_id)
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to the document store.
#[derive(Debug)]
pub enum KvError {
    /// Backing database error.
    Database(String),
    /// Stored value could not be encoded or decoded.
    Encoding(String),
    /// Store could not be reached.
    Unavailable(String),
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvError::Database(msg) => write!(f, "database error: {}", msg),
            KvError::Encoding(msg) => write!(f, "encoding error: {}", msg),
            KvError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for KvError {}

impl From<sqlx::Error> for KvError {
    fn from(e: sqlx::Error) -> Self {
        KvError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        KvError::Encoding(e.to_string())
    }
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, KvError>;

// =============================================================================
// Value Types
// =============================================================================

/// A stored document together with its current version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Value,
    pub version: u64,
}

/// Outcome of a compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapResult {
    /// The expected version matched and the write was applied. Carries the
    /// version of that write; `None` when nothing had to be written.
    Swapped(Option<u64>),
    /// The document changed underneath; carries what is stored now.
    Mismatch(Option<Versioned>),
}

/// A mutation observed on the store. `value` is `None` for deletions.
///
/// Changes may be delivered out of commit order; `version` is what orders
/// them. Deletions take a version from the same counter as writes.
#[derive(Debug, Clone, PartialEq)]
pub struct KvChange {
    pub path: String,
    pub value: Option<Value>,
    pub version: u64,
}

// =============================================================================
// RemoteKv Trait
// =============================================================================

/// A JSON document store with versioned writes and a live change feed.
#[async_trait]
pub trait RemoteKv: Send + Sync {
    /// Get the document at `path`, returning `None` if absent.
    async fn get(&self, path: &str) -> Result<Option<Versioned>>;

    /// Overwrite the document at `path` unconditionally.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Delete the document at `path`. Returns whether anything was removed.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Enumerate every document whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Versioned)>>;

    /// Replace the document at `path` only if its version still equals
    /// `expected`.
    ///
    /// `expected = None` requires the document to be absent. `new_value = None`
    /// deletes the document.
    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<u64>,
        new_value: Option<Value>,
    ) -> Result<SwapResult>;

    /// Subscribe to every mutation made through this store.
    fn watch(&self) -> broadcast::Receiver<KvChange>;
}
