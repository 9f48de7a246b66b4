//! Sign-in and sign-out.

use axum::{extract::State, Json};
use serde::Serialize;

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::models::Identity;
use crate::session::SignIn;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOut {
    pub user_id: String,
    pub signed_out: bool,
}

/// POST /api/session - Sign in with an identity from the sign-in provider.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(identity): Json<Identity>,
) -> ApiResult<SignIn> {
    success(state.sessions.sign_in(&identity).await?)
}

/// DELETE /api/session - Sign out the current user.
pub async fn sign_out(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<SignOut> {
    let signed_out = state.sessions.sign_out(&user_id);
    success(SignOut {
        user_id,
        signed_out,
    })
}
