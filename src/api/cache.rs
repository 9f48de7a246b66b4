//! Cache maintenance endpoint.

use axum::extract::State;

use super::{success, ApiResult};
use crate::cache::SweepReport;
use crate::AppState;

/// POST /api/cache/sweep - Remove expired cache entries.
pub async fn sweep_cache(State(state): State<AppState>) -> ApiResult<SweepReport> {
    success(state.cache.sweep().await)
}
