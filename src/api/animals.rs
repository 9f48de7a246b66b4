//! Animal listing endpoints.

use axum::extract::{Path, Query, State};
use serde::Serialize;

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::filter::{AnimalFilter, FilterOptions};
use crate::models::Animal;
use crate::orchestrator::Origin;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AnimalList {
    pub origin: Origin,
    pub total: usize,
    pub animals: Vec<Animal>,
}

/// GET /api/animals - Filtered dataset.
pub async fn list_animals(
    State(state): State<AppState>,
    Query(filter): Query<AnimalFilter>,
) -> ApiResult<AnimalList> {
    let dataset = state.orchestrator.fetch().await?;
    let animals: Vec<Animal> = filter
        .apply(&dataset.animals)
        .into_iter()
        .cloned()
        .collect();

    success(AnimalList {
        origin: dataset.origin,
        total: animals.len(),
        animals,
    })
}

/// GET /api/animals/options - Values available for each filter.
pub async fn animal_options(State(state): State<AppState>) -> ApiResult<FilterOptions> {
    let dataset = state.orchestrator.fetch().await?;
    success(FilterOptions::collect(&dataset.animals))
}

/// GET /api/animals/:id - Single animal.
pub async fn get_animal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Animal> {
    match state.orchestrator.find(&id).await? {
        Some(animal) => success(animal),
        None => Err(AppError::NotFound(format!("Animal {} not found", id))),
    }
}
