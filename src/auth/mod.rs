//! Service key guard and signed-in user extraction.
//!
//! The service key is compared in constant time.

use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::AppState;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header naming the signed-in user a request acts for.
pub const USER_ID_HEADER: &str = "x-user-id";

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // No PSK configured: dev mode
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let headers = request.headers();
    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    let accepted = match (api_key, bearer) {
        (Some(key), _) => constant_time_compare(key, &expected),
        (None, Some(token)) => constant_time_compare(token, &expected),
        (None, None) => {
            return AppError::Unauthorized("Missing API key".to_string()).into_response()
        }
    };

    if accepted {
        next.run(request).await
    } else {
        tracing::warn!("Rejected request to {} with invalid API key", request.uri().path());
        AppError::Unauthorized("Invalid API key".to_string()).into_response()
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn user_id_header(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string)
}

/// A user with an active session. Rejects with `AUTH_REQUIRED` otherwise.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match MaybeUser::from_request_parts(parts, state).await {
            Ok(MaybeUser(Some(user_id))) => Ok(CurrentUser(user_id)),
            _ => Err(AppError::AuthRequired(
                "Sign in to use the collection".to_string(),
            )),
        }
    }
}

/// The signed-in user, if the request names one with an active session.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<String>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = user_id_header(parts).filter(|uid| {
            let active = state.sessions.is_active(uid);
            if !active {
                tracing::debug!("Ignoring {} for inactive user {}", USER_ID_HEADER, uid);
            }
            active
        });
        Ok(MaybeUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare("test-key-123", "test-key-123"));
    }

    #[test]
    fn test_constant_time_compare_not_equal() {
        assert!(!constant_time_compare("test-key-123", "test-key-124"));
    }

    #[test]
    fn test_constant_time_compare_different_lengths() {
        assert!(!constant_time_compare("short", "much-longer-key"));
    }

    #[test]
    fn test_user_id_header_trims_and_skips_blank() {
        let (parts, _) = HttpRequest::builder()
            .header(USER_ID_HEADER, "  u1 ")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(user_id_header(&parts).as_deref(), Some("u1"));

        let (parts, _) = HttpRequest::builder()
            .header(USER_ID_HEADER, "   ")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(user_id_header(&parts), None);
    }
}
