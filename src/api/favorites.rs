//! Device-local favorites endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult, ItemState};
use crate::models::Animal;
use crate::AppState;

/// GET /api/favorites - Saved animals in the order they were added.
pub async fn list_favorites(State(state): State<AppState>) -> ApiResult<Vec<Animal>> {
    success(state.favorites.list().await)
}

/// POST /api/favorites - Save an animal record.
pub async fn add_favorite(
    State(state): State<AppState>,
    Json(animal): Json<Animal>,
) -> ApiResult<ItemState> {
    let id = animal.animal_id.clone();
    let changed = state.favorites.add(animal).await?;
    success(ItemState {
        id,
        saved: true,
        changed: Some(changed),
    })
}

/// DELETE /api/favorites/:id - Forget a saved animal.
pub async fn remove_favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ItemState> {
    let changed = state.favorites.remove(&id).await?;
    success(ItemState {
        id,
        saved: false,
        changed: Some(changed),
    })
}
