//! Per-user set of collected animal ids.
//!
//! Membership lives in the `collect` map of `users/{userId}`. Each process
//! keeps a mirror per user made of the last confirmed membership plus an
//! overlay of writes still in flight, so `contains` answers immediately.
//!
//! Writes are read-modify-write cycles committed with compare-and-swap on the
//! version that was read, retried on conflict. A concurrent writer on another
//! device can delay a write but never silently undo it.
//!
//! Confirmed state is tagged with the store version it was read at. Change
//! events can arrive out of commit order, so a confirmation older than the
//! one the mirror holds is dropped. An absent record reads as version 0.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{json, Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::errors::AppError;
use crate::kv::{paths, RemoteKv, SwapResult, Versioned};
use crate::models::UserRecord;

/// How many conflicting writes a single update tolerates before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Add,
    Remove,
}

impl Pending {
    fn wants_member(self) -> bool {
        matches!(self, Pending::Add)
    }
}

#[derive(Debug, Default)]
struct Mirror {
    confirmed: BTreeSet<String>,
    /// Store version `confirmed` was read at
    version: u64,
    pending: HashMap<String, Pending>,
}

impl Mirror {
    fn contains(&self, item_id: &str) -> bool {
        match self.pending.get(item_id) {
            Some(op) => op.wants_member(),
            None => self.confirmed.contains(item_id),
        }
    }

    fn members(&self) -> Vec<String> {
        let mut members: BTreeSet<String> = self.confirmed.clone();
        for (item_id, op) in &self.pending {
            match op {
                Pending::Add => members.insert(item_id.clone()),
                Pending::Remove => members.remove(item_id),
            };
        }
        members.into_iter().collect()
    }

    /// Replace confirmed state with `members` as of `version`, unless the
    /// mirror already holds a later one. Overlay entries it agrees with are
    /// done. Returns whether it was applied.
    fn confirm_at(&mut self, members: BTreeSet<String>, version: u64) -> bool {
        if version < self.version {
            return false;
        }
        self.confirmed = members;
        self.version = version;
        let confirmed = &self.confirmed;
        self.pending
            .retain(|item_id, op| op.wants_member() != confirmed.contains(item_id));
        true
    }

    /// Drop the overlay entry of a write that finished, either way.
    fn settle(&mut self, item_id: &str, op: Pending) {
        if self.pending.get(item_id) == Some(&op) {
            self.pending.remove(item_id);
        }
    }
}

type Mirrors = Arc<RwLock<HashMap<String, Mirror>>>;

/// Live listener on a user's record. Dropping it detaches the listener.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Collected-item membership for signed-in users.
pub struct CollectionSet {
    kv: Arc<dyn RemoteKv>,
    mirrors: Mirrors,
    max_attempts: usize,
}

impl CollectionSet {
    pub fn new(kv: Arc<dyn RemoteKv>) -> Self {
        Self::with_max_attempts(kv, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(kv: Arc<dyn RemoteKv>, max_attempts: usize) -> Self {
        Self {
            kv,
            mirrors: Arc::new(RwLock::new(HashMap::new())),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether `item_id` is collected, as far as this process knows.
    pub fn contains(&self, user_id: &str, item_id: &str) -> bool {
        self.mirrors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(|mirror| mirror.contains(item_id))
            .unwrap_or(false)
    }

    /// Every collected id, sorted, with in-flight writes applied.
    pub fn members(&self, user_id: &str) -> Vec<String> {
        self.mirrors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(Mirror::members)
            .unwrap_or_default()
    }

    /// Reload confirmed membership from the store.
    pub async fn refresh(&self, user_id: &str) -> Result<(), AppError> {
        validate_id("user id", user_id)?;
        let doc = self.kv.get(&paths::user(user_id)).await?;
        let (members, version) = match doc {
            Some(doc) => (record_members(&doc.value), doc.version),
            None => (BTreeSet::new(), 0),
        };
        self.with_mirror(user_id, |mirror| mirror.confirm_at(members, version));
        Ok(())
    }

    /// Add `item_id` to the user's collection. Already collected is success.
    /// Returns whether the stored record changed.
    pub async fn add(&self, user_id: &str, item_id: &str) -> Result<bool, AppError> {
        self.apply(user_id, item_id, Pending::Add).await
    }

    /// Remove `item_id` from the user's collection. Not collected is success.
    /// Returns whether the stored record changed.
    pub async fn remove(&self, user_id: &str, item_id: &str) -> Result<bool, AppError> {
        self.apply(user_id, item_id, Pending::Remove).await
    }

    /// Drop the user's mirror. Membership reads as empty until the next
    /// refresh or subscription.
    pub fn forget(&self, user_id: &str) {
        self.mirrors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
    }

    /// Add many ids in one write. Returns how many were new.
    pub async fn add_all(&self, user_id: &str, item_ids: &[String]) -> Result<usize, AppError> {
        validate_id("user id", user_id)?;
        for item_id in item_ids {
            validate_id("item id", item_id)?;
        }
        if item_ids.is_empty() {
            return Ok(0);
        }

        let (members, added, version) = self
            .write_membership(user_id, |collect| {
                item_ids
                    .iter()
                    .filter(|item_id| collect.insert((*item_id).clone()))
                    .count()
            })
            .await?;

        self.with_mirror(user_id, |mirror| mirror.confirm_at(members, version));
        tracing::info!("Merged {} new ids into collection of {}", added, user_id);
        Ok(added)
    }

    /// Listen to the user's record.
    ///
    /// `on_change` receives the current record right away and then every
    /// later version, including the ones this process writes. Each delivery
    /// newer than what the mirror holds becomes its confirmed membership;
    /// older ones are dropped without calling `on_change`.
    pub fn subscribe<F>(&self, user_id: &str, on_change: F) -> Subscription
    where
        F: Fn(Option<&UserRecord>) + Send + Sync + 'static,
    {
        // Registered before the initial read so nothing slips between them
        let mut changes = self.kv.watch();
        let kv = Arc::clone(&self.kv);
        let mirrors = Arc::clone(&self.mirrors);
        let user_id = user_id.to_string();
        let path = paths::user(&user_id);

        let task = tokio::spawn(async move {
            match kv.get(&path).await {
                Ok(doc) => deliver_read(&mirrors, &user_id, doc, &on_change),
                Err(e) => tracing::warn!("Initial read of {} failed: {}", path, e),
            }

            loop {
                match changes.recv().await {
                    Ok(change) if change.path == path => {
                        deliver(&mirrors, &user_id, change.value, change.version, &on_change)
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Listener on {} lagged by {} changes, re-reading", path, skipped);
                        match kv.get(&path).await {
                            Ok(doc) => deliver_read(&mirrors, &user_id, doc, &on_change),
                            Err(e) => tracing::warn!("Re-read of {} failed: {}", path, e),
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription { task }
    }

    async fn apply(&self, user_id: &str, item_id: &str, op: Pending) -> Result<bool, AppError> {
        validate_id("user id", user_id)?;
        validate_id("item id", item_id)?;

        // Optimistic: visible to contains() before the write settles
        self.with_mirror(user_id, |mirror| {
            mirror.pending.insert(item_id.to_string(), op);
        });

        let result = self
            .write_membership(user_id, |collect| {
                let changed = match op {
                    Pending::Add => collect.insert(item_id.to_string()),
                    Pending::Remove => collect.remove(item_id),
                };
                usize::from(changed)
            })
            .await;

        self.with_mirror(user_id, |mirror| {
            if let Ok((members, _, version)) = &result {
                mirror.confirm_at(members.clone(), *version);
            }
            mirror.settle(item_id, op);
        });

        match result {
            Ok((_, changes, _)) => Ok(changes > 0),
            Err(e) => {
                tracing::warn!(
                    "Collection update {:?} {} for {} failed, rolled back: {}",
                    op,
                    item_id,
                    user_id,
                    e
                );
                Err(e)
            }
        }
    }

    /// Read the record, let `mutate` edit its membership, and commit with
    /// compare-and-swap. Skips the write when `mutate` reports no change.
    ///
    /// Returns the resulting members, the change count, and the store
    /// version those members were read or written at.
    async fn write_membership<M>(
        &self,
        user_id: &str,
        mut mutate: M,
    ) -> Result<(BTreeSet<String>, usize, u64), AppError>
    where
        M: FnMut(&mut BTreeSet<String>) -> usize,
    {
        let path = paths::user(user_id);

        for attempt in 1..=self.max_attempts {
            let current = self.kv.get(&path).await?;
            let (mut record, expected) = match current {
                Some(doc) => (doc.value, Some(doc.version)),
                None => (json!({}), None),
            };

            let Some(fields) = record.as_object_mut() else {
                return Err(AppError::RemoteStore(format!(
                    "User record {} is not an object",
                    user_id
                )));
            };

            let mut members = collect_members(fields);
            let changes = mutate(&mut members);
            if changes == 0 {
                return Ok((members, 0, expected.unwrap_or(0)));
            }
            // Only members are written back; stray `false` or non-bool entries go
            let collect: Map<String, Value> = members
                .iter()
                .map(|id| (id.clone(), Value::Bool(true)))
                .collect();
            fields.insert("collect".to_string(), Value::Object(collect));

            match self.kv.compare_and_swap(&path, expected, Some(record)).await? {
                SwapResult::Swapped(version) => {
                    let version = version.or(expected).unwrap_or(0);
                    return Ok((members, changes, version));
                }
                SwapResult::Mismatch(_) => {
                    tracing::debug!(
                        "Record {} changed underneath (attempt {}/{}), retrying",
                        path,
                        attempt,
                        self.max_attempts
                    );
                }
            }
        }

        Err(AppError::Conflict(format!(
            "Collection of {} kept changing; gave up after {} attempts",
            user_id, self.max_attempts
        )))
    }

    fn with_mirror<R>(&self, user_id: &str, f: impl FnOnce(&mut Mirror) -> R) -> R {
        let mut mirrors = self.mirrors.write().unwrap_or_else(PoisonError::into_inner);
        f(mirrors.entry(user_id.to_string()).or_default())
    }
}

fn deliver_read<F>(mirrors: &Mirrors, user_id: &str, doc: Option<Versioned>, on_change: &F)
where
    F: Fn(Option<&UserRecord>),
{
    match doc {
        Some(doc) => deliver(mirrors, user_id, Some(doc.value), doc.version, on_change),
        None => deliver(mirrors, user_id, None, 0, on_change),
    }
}

fn deliver<F>(mirrors: &Mirrors, user_id: &str, value: Option<Value>, version: u64, on_change: &F)
where
    F: Fn(Option<&UserRecord>),
{
    let members = value.as_ref().map(record_members).unwrap_or_default();
    let applied = mirrors
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(user_id.to_string())
        .or_default()
        .confirm_at(members, version);
    if !applied {
        tracing::debug!("Dropping stale version {} of record {}", version, user_id);
        return;
    }

    let record = match value {
        Some(value) => match serde_json::from_value::<UserRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Record for {} has unreadable fields: {}", user_id, e);
                return;
            }
        },
        None => None,
    };

    on_change(record.as_ref());
}

/// Ids whose `collect` entry is `true`; anything else is not a member.
fn collect_members(fields: &Map<String, Value>) -> BTreeSet<String> {
    fields
        .get("collect")
        .and_then(Value::as_object)
        .map(|collect| {
            collect
                .iter()
                .filter(|(_, present)| present.as_bool() == Some(true))
                .map(|(id, _)| id.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn record_members(record: &Value) -> BTreeSet<String> {
    record
        .as_object()
        .map(collect_members)
        .unwrap_or_default()
}

fn validate_id(what: &str, id: &str) -> Result<(), AppError> {
    if id.trim().is_empty() || id.contains('/') {
        return Err(AppError::Validation(format!("Invalid {}: {:?}", what, id)));
    }
    Ok(())
}
