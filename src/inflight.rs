//! Coalescing of concurrent async calls that share a key.
//!
//! The first caller for a key runs the operation; callers arriving while it
//! runs wait and receive a clone of its output. Once the output is published
//! the key is released, so a later call runs the operation again.
//!
//! If the running caller is dropped before finishing, one of the waiters
//! takes over and runs the operation itself.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

type Slot<T> = watch::Receiver<Option<T>>;

/// Per-key single-flight guard.
pub struct InFlight<K, T> {
    calls: Mutex<HashMap<K, Slot<T>>>,
}

enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Follower(Slot<T>),
}

/// Releases the key when the leader finishes or is dropped.
struct Release<'a, K: Hash + Eq, T> {
    calls: &'a Mutex<HashMap<K, Slot<T>>>,
    key: &'a K,
}

impl<K: Hash + Eq, T> Drop for Release<'_, K, T> {
    fn drop(&mut self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}

impl<K, T> InFlight<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn join(&self, key: &K) -> Role<T> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = calls.get(key) {
            return Role::Follower(slot.clone());
        }
        let (tx, rx) = watch::channel(None);
        calls.insert(key.clone(), rx);
        Role::Leader(tx)
    }

    /// Run `f` for `key`, or wait for the call already running for it.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            match self.join(&key) {
                Role::Leader(tx) => {
                    let _release = Release {
                        calls: &self.calls,
                        key: &key,
                    };
                    let output = f().await;
                    tx.send_replace(Some(output.clone()));
                    return output;
                }
                Role::Follower(mut slot) => {
                    let published = match slot.wait_for(Option::is_some).await {
                        Ok(ready) => (*ready).clone(),
                        Err(_) => None,
                    };
                    if let Some(output) = published {
                        return output;
                    }
                    // Leader went away without an answer; try to lead
                    tracing::debug!("In-flight call abandoned, retrying");
                }
            }
        }
    }

    /// Number of keys with a call currently running.
    pub fn in_flight_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K, T> Default for InFlight<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
