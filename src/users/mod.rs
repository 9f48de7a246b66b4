//! User records under `users/{userId}`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::clock::Clock;
use crate::errors::AppError;
use crate::kv::{paths, RemoteKv, SwapResult};
use crate::models::{Identity, UserRecord};

const MAX_CREATE_ATTEMPTS: usize = 3;

pub struct UserDirectory {
    kv: Arc<dyn RemoteKv>,
    clock: Arc<dyn Clock>,
}

impl UserDirectory {
    pub fn new(kv: Arc<dyn RemoteKv>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    /// Return the user's record, creating it on first sign-in.
    ///
    /// The boolean is `true` when this call created the record. If another
    /// writer creates it first, theirs is kept and returned.
    pub async fn ensure_user(&self, identity: &Identity) -> Result<(UserRecord, bool), AppError> {
        let uid = identity.uid.trim();
        if uid.is_empty() || uid.contains('/') {
            return Err(AppError::Validation(format!("Invalid user id: {:?}", identity.uid)));
        }
        let path = paths::user(uid);

        for _ in 0..MAX_CREATE_ATTEMPTS {
            if let Some(doc) = self.kv.get(&path).await? {
                return Ok((parse_record(uid, doc.value)?, false));
            }

            let record = UserRecord::for_identity(identity, self.created_at());
            let value = serde_json::to_value(&record)
                .map_err(|e| AppError::Internal(format!("Could not encode user record: {}", e)))?;

            match self.kv.compare_and_swap(&path, None, Some(value)).await? {
                SwapResult::Swapped(_) => {
                    tracing::info!("Created user record for {}", uid);
                    return Ok((record, true));
                }
                SwapResult::Mismatch(Some(current)) => {
                    tracing::debug!("User record for {} was created concurrently", uid);
                    return Ok((parse_record(uid, current.value)?, false));
                }
                // Created and deleted again in between; start over
                SwapResult::Mismatch(None) => {}
            }
        }

        Err(AppError::Conflict(format!(
            "User record for {} kept changing during sign-in",
            uid
        )))
    }

    fn created_at(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.clock.now_ms())
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

fn parse_record(uid: &str, value: serde_json::Value) -> Result<UserRecord, AppError> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!("Stored record for {} is unreadable: {}", uid, e);
        AppError::RemoteStore(format!("User record for {} is unreadable", uid))
    })
}
