//! Error types for the Ripple server.
//!
//! This module defines the HTTP-facing error taxonomy. The split mirrors the
//! API contract:
//!
//! - [`ApiError::AuthMissing`] - no credential presented (HTTP 401)
//! - [`ApiError::AuthInvalid`] - credential present but failed verification
//!   or does not match persisted state (HTTP 403)
//! - [`ApiError::Store`] / [`ApiError::Internal`] - persistence and
//!   unexpected failures (HTTP 500)
//!
//! Domain-level outcomes that the wire contract encodes as a `code` field in
//! a 200 body (user lookup misses, duplicate registration, bad credentials)
//! are NOT errors here; the handlers build those bodies directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::feed::FeedError;
use crate::store::StoreError;

/// Errors surfaced to HTTP clients as non-200 responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No credential was presented. The request is halted before any
    /// identity is established.
    #[error("authentication required")]
    AuthMissing,

    /// A credential was presented but failed verification, or no longer
    /// matches the persisted state.
    #[error("invalid credentials")]
    AuthInvalid,

    /// A persistence call failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Unexpected internal failure.
    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<FeedError> for ApiError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Store(inner) => Self::Store(inner),
            FeedError::AuthorStamp { .. } => Self::Internal(err.to_string()),
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    /// Creates an error body with the given message.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::AuthMissing => StatusCode::UNAUTHORIZED,
            Self::AuthInvalid => StatusCode::FORBIDDEN,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}
