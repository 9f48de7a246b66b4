//! Signed-in users and their live collection listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::collection::{CollectionSet, Subscription};
use crate::errors::AppError;
use crate::favorites::LocalFavoritesStore;
use crate::models::{Identity, UserRecord};
use crate::users::UserDirectory;

/// Outcome of a sign-in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignIn {
    pub user_id: String,
    pub user: UserRecord,
    /// The user record did not exist before this sign-in.
    pub created: bool,
    /// Local favorites that were new to the collection.
    pub merged: usize,
}

pub struct SessionRegistry {
    users: Arc<UserDirectory>,
    collection: Arc<CollectionSet>,
    favorites: Arc<LocalFavoritesStore>,
    active: Mutex<HashMap<String, Subscription>>,
}

impl SessionRegistry {
    pub fn new(
        users: Arc<UserDirectory>,
        collection: Arc<CollectionSet>,
        favorites: Arc<LocalFavoritesStore>,
    ) -> Self {
        Self {
            users,
            collection,
            favorites,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Sign a user in.
    ///
    /// Ensures the user record exists, folds the device's favorites into the
    /// collection and starts listening to the record. Signing in again
    /// replaces the previous listener.
    pub async fn sign_in(&self, identity: &Identity) -> Result<SignIn, AppError> {
        let (user, created) = self.users.ensure_user(identity).await?;
        let user_id = identity.uid.trim().to_string();

        let local_ids: Vec<String> = self
            .favorites
            .list()
            .await
            .into_iter()
            .map(|animal| animal.animal_id)
            .collect();

        // The local list stays as it is, so a failed merge is retried next time
        let merged = match self.collection.add_all(&user_id, &local_ids).await {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!("Could not merge local favorites for {}: {}", user_id, e);
                0
            }
        };

        self.collection.refresh(&user_id).await?;

        let listener_id = user_id.clone();
        let subscription = self.collection.subscribe(&user_id, move |record| {
            let count = record.map(|r| r.members().len()).unwrap_or(0);
            tracing::debug!("Collection of {} now holds {} items", listener_id, count);
        });
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.clone(), subscription);

        tracing::info!("User {} signed in", user_id);
        Ok(SignIn {
            user_id,
            user,
            created,
            merged,
        })
    }

    /// Sign a user out and drop their mirrored collection. Returns whether
    /// they were signed in.
    pub fn sign_out(&self, user_id: &str) -> bool {
        let removed = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);

        match removed {
            Some(subscription) => {
                subscription.unsubscribe();
                self.collection.forget(user_id);
                tracing::info!("User {} signed out", user_id);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user_id)
    }
}
