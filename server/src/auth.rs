//! Auth gate: token verification at every entry point.
//!
//! Two entry shapes share one verification core:
//!
//! - [`AuthUser`] - an axum extractor that reads a bearer token from the
//!   `Authorization` header, verifies it, and hands the resolved user id to
//!   the handler. A missing credential halts the request with 401 before
//!   any identity is established; a present-but-invalid one with 403.
//! - [`authorize_socket`] - the handshake guard for WebSocket upgrades.
//!   It runs BEFORE the upgrade is accepted, so a rejected client never
//!   joins the broadcast hub and never observes an event.
//!
//! This module never mints tokens and never consults the store:
//! authentication here is purely cryptographic and stateless. Refresh-token
//! persisted-value checks live with the handlers that own the user record.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::AppState;
use crate::token::TokenService;

/// The authenticated user id resolved from a bearer access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::AuthMissing)?;

        let token = header
            .strip_prefix("Bearer ")
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::AuthMissing)?;

        let user_id = state.tokens.verify_access(token).map_err(|err| {
            debug!(error = %err, "Bearer token failed verification");
            ApiError::AuthInvalid
        })?;

        Ok(Self(user_id))
    }
}

/// Verifies the handshake token of a connection attempt.
///
/// Returns the resolved user id to tag the connection with for its
/// lifetime. Missing or invalid tokens refuse the connection attempt.
pub fn authorize_socket(
    token: Option<&str>,
    tokens: &TokenService,
) -> Result<Uuid, ApiError> {
    let token = token
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::AuthMissing)?;

    tokens.verify_access(token).map_err(|err| {
        debug!(error = %err, "Handshake token failed verification");
        ApiError::AuthInvalid
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_state;
    use axum::http::Request;

    async fn extract(state: &AppState, header: Option<&str>) -> Result<AuthUser, ApiError> {
        let mut builder = Request::builder().uri("/posts");
        if let Some(header) = header {
            builder = builder.header(AUTHORIZATION, header);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();

        AuthUser::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn extractor_resolves_valid_bearer_token() {
        let state = test_state();
        let user_id = Uuid::new_v4();
        let token = state.tokens.issue_access(user_id).unwrap();

        let auth = extract(&state, Some(&format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(auth, AuthUser(user_id));
    }

    #[tokio::test]
    async fn extractor_rejects_missing_header_as_missing() {
        let state = test_state();
        let err = extract(&state, None).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthMissing));
    }

    #[tokio::test]
    async fn extractor_rejects_non_bearer_header_as_missing() {
        let state = test_state();
        let err = extract(&state, Some("Basic dXNlcjpwYXNz")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthMissing));

        let err = extract(&state, Some("Bearer ")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthMissing));
    }

    #[tokio::test]
    async fn extractor_rejects_bad_token_as_invalid() {
        let state = test_state();
        let err = extract(&state, Some("Bearer not.a.token")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthInvalid));
    }

    #[tokio::test]
    async fn extractor_rejects_refresh_token_as_invalid() {
        let state = test_state();
        let refresh = state.tokens.issue_refresh(Uuid::new_v4()).unwrap();

        let err = extract(&state, Some(&format!("Bearer {refresh}")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthInvalid));
    }

    #[tokio::test]
    async fn socket_guard_resolves_valid_token() {
        let state = test_state();
        let user_id = Uuid::new_v4();
        let token = state.tokens.issue_access(user_id).unwrap();

        assert_eq!(
            authorize_socket(Some(&token), &state.tokens).unwrap(),
            user_id
        );
    }

    #[tokio::test]
    async fn socket_guard_refuses_missing_or_empty_token() {
        let state = test_state();

        assert!(matches!(
            authorize_socket(None, &state.tokens).unwrap_err(),
            ApiError::AuthMissing
        ));
        assert!(matches!(
            authorize_socket(Some(""), &state.tokens).unwrap_err(),
            ApiError::AuthMissing
        ));
    }

    #[tokio::test]
    async fn socket_guard_refuses_invalid_token() {
        let state = test_state();
        assert!(matches!(
            authorize_socket(Some("garbage"), &state.tokens).unwrap_err(),
            ApiError::AuthInvalid
        ));
    }
}
