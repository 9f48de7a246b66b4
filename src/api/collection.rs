//! Collection endpoints for signed-in users.

use axum::extract::{Path, State};
use serde::Serialize;

use super::{success, ApiResult, ItemState};
use crate::auth::CurrentUser;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionView {
    pub user_id: String,
    pub items: Vec<String>,
}

/// GET /api/collection - Every collected id.
pub async fn list_collection(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<CollectionView> {
    let items = state.collection.members(&user_id);
    success(CollectionView { user_id, items })
}

/// GET /api/collection/:id - Whether an id is collected.
pub async fn get_collected(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<ItemState> {
    let saved = state.collection.contains(&user_id, &id);
    success(ItemState {
        id,
        saved,
        changed: None,
    })
}

/// PUT /api/collection/:id - Collect an id.
pub async fn add_collected(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<ItemState> {
    let changed = state.collection.add(&user_id, &id).await?;
    success(ItemState {
        id,
        saved: true,
        changed: Some(changed),
    })
}

/// DELETE /api/collection/:id - Drop an id.
pub async fn remove_collected(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<ItemState> {
    let changed = state.collection.remove(&user_id, &id).await?;
    success(ItemState {
        id,
        saved: false,
        changed: Some(changed),
    })
}
