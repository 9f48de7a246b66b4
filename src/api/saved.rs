//! Save toggles that pick the backing store per request: the user's
//! collection when signed in, this device's favorites otherwise.

use axum::extract::{Path, State};
use serde::Serialize;

use super::{success, ApiResult};
use crate::auth::MaybeUser;
use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SavedIn {
    Collection,
    Local,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedState {
    pub id: String,
    pub saved: bool,
    pub changed: bool,
    pub store: SavedIn,
}

/// PUT /api/saved/:id - Save an animal.
pub async fn save(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> ApiResult<SavedState> {
    let (changed, store) = match user {
        Some(user_id) => {
            let changed = state.collection.add(&user_id, &id).await?;
            (changed, SavedIn::Collection)
        }
        None => {
            // Local favorites keep the whole record
            let animal = state
                .orchestrator
                .find(&id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Animal {} not found", id)))?;
            (state.favorites.add(animal).await?, SavedIn::Local)
        }
    };

    success(SavedState {
        id,
        saved: true,
        changed,
        store,
    })
}

/// DELETE /api/saved/:id - Unsave an animal.
pub async fn unsave(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> ApiResult<SavedState> {
    let (changed, store) = match user {
        Some(user_id) => {
            let changed = state.collection.remove(&user_id, &id).await?;
            (changed, SavedIn::Collection)
        }
        None => (state.favorites.remove(&id).await?, SavedIn::Local),
    };

    success(SavedState {
        id,
        saved: false,
        changed,
        store,
    })
}
