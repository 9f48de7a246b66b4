//! REST API module.
//!
//! Handlers are thin: they extract, call one component, and wrap the result
//! in the response envelope.

mod animals;
mod cache;
mod collection;
mod favorites;
mod saved;
mod session;

pub use animals::*;
pub use cache::*;
pub use collection::*;
pub use favorites::*;
pub use saved::*;
pub use session::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Membership of one item after a read or write.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemState {
    pub id: String,
    pub saved: bool,
    /// Whether this request changed anything. Absent on reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}
