//! Token service: minting and verification of access and refresh tokens.
//!
//! Access tokens are short-lived HS256 JWTs carrying only the subject's user
//! id; refresh tokens are long-lived JWTs signed with a separate secret.
//! Splitting the secrets limits the blast radius if one leaks, and the short
//! access window bounds the damage of a stolen access token while refresh
//! tokens support long sessions with server-side revocation.
//!
//! Verification here is purely cryptographic. A refresh token is only
//! trustworthy once the caller has additionally compared it against the value
//! persisted on the user record; that equality check is what makes logout and
//! re-login revoke prior refresh tokens without a blocklist.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use ripple_server::token::TokenService;
//! use uuid::Uuid;
//!
//! let service = TokenService::new(
//!     "access-secret",
//!     "refresh-secret",
//!     Duration::from_secs(600),
//!     None,
//! );
//!
//! let user_id = Uuid::new_v4();
//! let token = service.issue_access(user_id).unwrap();
//! assert_eq!(service.verify_access(&token).unwrap(), user_id);
//! ```

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;

/// Errors that can occur when minting or verifying tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token's validity window has elapsed.
    #[error("token expired")]
    Expired,

    /// The token is malformed, carries a bad signature, or was signed with
    /// the wrong secret.
    #[error("invalid token")]
    Invalid,

    /// Signing failed while minting a token.
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl TokenError {
    fn from_decode(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid,
        }
    }
}

/// Claims carried by every token this service issues.
///
/// The subject's user id is the only domain claim; `exp` is present on all
/// access tokens and on refresh tokens only when a refresh TTL is configured.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userID")]
    user_id: String,
    iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

/// Mints and verifies access and refresh tokens.
///
/// Cheap to clone is not required here; the service lives in the shared
/// application state behind an `Arc`.
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Option<Duration>,
}

impl TokenService {
    /// Creates a service from raw secrets and TTL policy.
    #[must_use]
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Option<Duration>,
    ) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Creates a service from the server configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.access_token_secret,
            &config.refresh_token_secret,
            config.access_ttl,
            config.refresh_ttl,
        )
    }

    /// Issues a short-lived access token for the given user.
    ///
    /// No side effects beyond token creation.
    pub fn issue_access(&self, user_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now,
            exp: Some(now + self.access_ttl.as_secs() as i64),
        };

        encode(&Header::default(), &claims, &self.access_encoding).map_err(TokenError::Signing)
    }

    /// Issues a refresh token for the given user.
    ///
    /// The caller is responsible for persisting the returned value onto the
    /// user record, superseding any prior value.
    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now,
            exp: self
                .refresh_ttl
                .map(|ttl| now + ttl.as_secs() as i64),
        };

        encode(&Header::default(), &claims, &self.refresh_encoding).map_err(TokenError::Signing)
    }

    /// Verifies an access token and returns the subject's user id.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Expired`] once the validity window has elapsed
    /// - [`TokenError::Invalid`] for bad signatures or malformed tokens
    pub fn verify_access(&self, token: &str) -> Result<Uuid, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.access_decoding, &validation)
            .map_err(TokenError::from_decode)?;

        Uuid::parse_str(&data.claims.user_id).map_err(|_| TokenError::Invalid)
    }

    /// Verifies a refresh token's signature and returns the subject's user id.
    ///
    /// This check is purely cryptographic. The caller must additionally
    /// compare the token against the value stored on the user record before
    /// trusting it.
    pub fn verify_refresh(&self, token: &str) -> Result<Uuid, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        if self.refresh_ttl.is_none() {
            // Tokens minted under the non-expiring policy carry no exp claim.
            validation.validate_exp = false;
            validation.set_required_spec_claims::<&str>(&[]);
        }

        let data = decode::<Claims>(token, &self.refresh_decoding, &validation)
            .map_err(TokenError::from_decode)?;

        Uuid::parse_str(&data.claims.user_id).map_err(|_| TokenError::Invalid)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}
