//! HTTP route handlers for the Ripple server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /register`, `POST /login` - account creation and authentication
//! - `POST /token`, `DELETE /logout` - refresh-token exchange and revocation
//! - `GET /posts/all`, `POST /posts` - feed listing and post creation
//! - `GET /user/{id}`, `GET /user/{id}/posts` - user profiles
//! - `GET /ws` - WebSocket endpoint for realtime updates
//! - `GET /health` - health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`]: configuration,
//! the token service, the storage capability, the feed mutator, and the
//! broadcast hub. Domain outcomes that the wire contract encodes as a
//! `code` field in a 200 body (duplicate registration, bad credentials,
//! user-lookup misses) are built here; transport-level failures use
//! [`ApiError`] and real status codes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::auth::{authorize_socket, AuthUser};
use crate::broadcast::{ConnectionRegistry, FeedBroadcaster};
use crate::config::Config;
use crate::error::ApiError;
use crate::feed::{FeedError, FeedMutator};
use crate::store::{FeedStore, StoreError};
use crate::token::TokenService;
use crate::types::{ClientEvent, Post, ServerEvent, User};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Cloned per request; every field is either cheap to clone or shared
/// behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Storage capability for users and posts.
    pub store: Arc<dyn FeedStore>,

    /// Feed mutator applying validated mutations to the store.
    pub feed: FeedMutator,

    /// Token service minting and verifying access/refresh tokens.
    pub tokens: Arc<TokenService>,

    /// Broadcast hub distributing events to WebSocket clients.
    pub broadcaster: FeedBroadcaster,

    /// Live set of authenticated connections.
    pub registry: Arc<ConnectionRegistry>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state over the given store.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn FeedStore>) -> Self {
        let tokens = Arc::new(TokenService::from_config(&config));
        Self {
            config: Arc::new(config),
            feed: FeedMutator::new(Arc::clone(&store)),
            store,
            tokens,
            broadcaster: FeedBroadcaster::new(),
            registry: Arc::new(ConnectionRegistry::new()),
            start_time: Instant::now(),
        }
    }

    /// Creates application state, dispatching the store from the configured
    /// connection string.
    pub fn from_config(config: Config) -> Result<Self, StoreError> {
        let store = crate::store::from_url(&config.store_url)?;
        Ok(Self::new(config, store))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("broadcaster", &self.broadcaster)
            .field("registry", &self.registry)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/posts/all", get(get_all_posts))
        .route("/posts", post(create_post))
        .route("/user/{id}", get(get_user))
        .route("/user/{id}/posts", get(get_user_posts))
        .route("/register", post(post_register))
        .route("/login", post(post_login))
        .route("/token", post(post_token))
        .route("/logout", delete(delete_logout))
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Request body for `POST /register`.
#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

/// Request body for `POST /login`.
#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Request body for `POST /posts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostRequest {
    content: String,
    created_at: DateTime<Utc>,
}

/// Request body for `POST /token` and `DELETE /logout`.
#[derive(Debug, Deserialize)]
struct RefreshTokenRequest {
    token: Option<String>,
}

/// Domain-coded `{code, message}` response body.
#[derive(Debug, Serialize, Deserialize)]
struct CodeMessage {
    code: u16,
    message: String,
}

impl CodeMessage {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Success body for `POST /register` and `POST /login`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    code: u16,
    message: String,
    access_token: String,
    refresh_token: String,
    username: String,
    #[serde(rename = "userID")]
    user_id: Uuid,
    profile_image: String,
}

/// Success body for `POST /token`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenResponse {
    access_token: String,
}

/// Success body for `DELETE /logout`.
#[derive(Debug, Serialize, Deserialize)]
struct LogoutResponse {
    message: String,
}

/// Found-user body for `GET /user/{id}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    code: u16,
    message: String,
    username: String,
    profile_image: String,
    verified: bool,
    posts: Vec<Uuid>,
}

/// Query parameters for the WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    /// Access token; required, verified before the upgrade is accepted.
    pub token: Option<String>,
}

// ============================================================================
// Account Handlers
// ============================================================================

/// POST /register - Create an account and open a session.
///
/// Returns a `{code: 400}` body when the username is taken; otherwise
/// persists the new user, stores a fresh refresh token on the record, and
/// returns both tokens.
async fn post_register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if state
        .store
        .find_user_by_username(&body.username)
        .await?
        .is_some()
    {
        debug!(username = %body.username, "Registration rejected: username taken");
        return Ok(Json(CodeMessage::new(400, "User already exists")).into_response());
    }

    let password_hash = bcrypt::hash(&body.password, bcrypt::DEFAULT_COST)
        .map_err(|err| ApiError::Internal(format!("password hashing failed: {err}")))?;

    let user = User::new(body.username, body.email, password_hash);
    let user = match state.store.create_user(user).await {
        Ok(user) => user,
        // Lost a race on the username between the check and the insert.
        Err(StoreError::UsernameTaken(_)) => {
            return Ok(Json(CodeMessage::new(400, "User already exists")).into_response());
        }
        Err(err) => return Err(err.into()),
    };

    let session = open_session(&state, &user, "User created successfully").await?;
    info!(user_id = %user.id, username = %user.username, "User registered");
    Ok(Json(session).into_response())
}

/// POST /login - Authenticate and open a session.
///
/// Bad credentials (unknown username or wrong password) yield the same
/// `{code: 400}` body and never issue tokens.
async fn post_login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = state.store.find_user_by_username(&body.username).await?;

    let Some(user) = user else {
        debug!(username = %body.username, "Login rejected: unknown username");
        return Ok(Json(CodeMessage::new(400, "Invalid credentials")).into_response());
    };

    let password_valid = bcrypt::verify(&body.password, &user.password_hash)
        .map_err(|err| ApiError::Internal(format!("password verification failed: {err}")))?;
    if !password_valid {
        debug!(username = %body.username, "Login rejected: wrong password");
        return Ok(Json(CodeMessage::new(400, "Invalid credentials")).into_response());
    }

    let session = open_session(&state, &user, "User logged in successfully").await?;
    info!(user_id = %user.id, username = %user.username, "User logged in");
    Ok(Json(session).into_response())
}

/// Issues a token pair for the user and persists the refresh token,
/// superseding any previously stored value.
async fn open_session(
    state: &AppState,
    user: &User,
    message: &str,
) -> Result<AuthResponse, ApiError> {
    let refresh_token = state
        .tokens
        .issue_refresh(user.id)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    state
        .store
        .set_refresh_token(user.id, Some(refresh_token.clone()))
        .await?;

    let access_token = state
        .tokens
        .issue_access(user.id)
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(AuthResponse {
        code: 200,
        message: message.to_string(),
        access_token,
        refresh_token,
        username: user.username.clone(),
        user_id: user.id,
        profile_image: user.profile_image.clone(),
    })
}

/// POST /token - Exchange a refresh token for a new access token.
///
/// The refresh token must verify cryptographically AND equal the value
/// currently stored on the user record; either failure is 403. A missing
/// token is 401.
async fn post_token(
    State(state): State<AppState>,
    Json(body): Json<RefreshTokenRequest>,
) -> Result<Json<AccessTokenResponse>, ApiError> {
    let token = body
        .token
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::AuthMissing)?;

    let user_id = state.tokens.verify_refresh(&token).map_err(|err| {
        debug!(error = %err, "Refresh token failed verification");
        ApiError::AuthInvalid
    })?;

    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or(ApiError::AuthInvalid)?;

    // The persisted value is the revocation mechanism: a superseded or
    // logged-out token no longer matches and is refused here.
    if user.refresh_token.as_deref() != Some(token.as_str()) {
        debug!(user_id = %user_id, "Refresh token does not match stored value");
        return Err(ApiError::AuthInvalid);
    }

    let access_token = state
        .tokens
        .issue_access(user_id)
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    debug!(user_id = %user_id, "Access token refreshed");
    Ok(Json(AccessTokenResponse { access_token }))
}

/// DELETE /logout - Revoke the session holding the given refresh token.
///
/// Clears the stored refresh token on whichever user holds the value.
/// Idempotent: logging out an already-revoked token still succeeds.
async fn delete_logout(
    State(state): State<AppState>,
    Json(body): Json<RefreshTokenRequest>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let token = body
        .token
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::AuthMissing)?;

    let revoked = state.store.revoke_refresh_token(&token).await?;
    info!(revoked, "Logout processed");

    Ok(Json(LogoutResponse {
        message: "Logged out successfully".to_string(),
    }))
}

// ============================================================================
// Feed Handlers
// ============================================================================

/// GET /posts/all - List all posts, newest first. No authentication.
async fn get_all_posts(State(state): State<AppState>) -> Result<Json<Vec<Post>>, ApiError> {
    let posts = state.feed.list_posts().await?;
    debug!(count = posts.len(), "Listing all posts");
    Ok(Json(posts))
}

/// POST /posts - Create a post as the authenticated user.
///
/// The resulting post (with its author stamp) is broadcast to all live
/// connections.
async fn create_post(
    State(state): State<AppState>,
    AuthUser(author_id): AuthUser,
    Json(body): Json<CreatePostRequest>,
) -> Result<Json<CodeMessage>, ApiError> {
    let post = state
        .feed
        .create_post(author_id, body.content, body.created_at)
        .await?;

    state.broadcaster.broadcast(ServerEvent::NewPostData(post));

    Ok(Json(CodeMessage::new(200, "Post created successfully")))
}

/// GET /user/{id} - Public profile lookup.
///
/// Misses (unknown or malformed id) are a `{code: 404}` body, not an HTTP
/// 404 status.
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || Json(CodeMessage::new(404, "User not found")).into_response();

    let Ok(user_id) = Uuid::parse_str(&id) else {
        return Ok(not_found());
    };

    match state.store.find_user_by_id(user_id).await? {
        Some(user) => Ok(Json(UserResponse {
            code: 200,
            message: "User found".to_string(),
            username: user.username,
            profile_image: user.profile_image,
            verified: user.verified,
            posts: user.posts,
        })
        .into_response()),
        None => Ok(not_found()),
    }
}

/// GET /user/{id}/posts - Posts authored by the given user, newest first.
///
/// A malformed or unknown id simply yields an empty array.
async fn get_user_posts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Post>>, ApiError> {
    let Ok(user_id) = Uuid::parse_str(&id) else {
        return Ok(Json(Vec::new()));
    };

    let posts = state.feed.posts_by_author(user_id).await?;
    Ok(Json(posts))
}

// ============================================================================
// WebSocket Endpoint
// ============================================================================

/// GET /ws - WebSocket endpoint for realtime updates.
///
/// The handshake requires a valid access token in the `token` query
/// parameter. Verification happens before the upgrade is accepted: a
/// rejected client never joins the hub and never receives an event.
async fn get_ws(
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
    ws: WebSocketUpgrade,
) -> Response {
    // The guard runs before the upgrade is accepted: a refused client is
    // answered on the plain HTTP response and never joins the hub.
    let user_id = match authorize_socket(params.token.as_deref(), &state.tokens) {
        Ok(user_id) => user_id,
        Err(err) => {
            info!("WebSocket connection refused");
            return err.into_response();
        }
    };

    info!(user_id = %user_id, "WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_websocket(socket, state, user_id))
}

/// Applies a client event as the given user and broadcasts the result.
///
/// This is the mutation core of the socket loop: on success the resulting
/// event has already been fanned out to every live connection and is
/// returned for inspection; on failure nothing was broadcast and the error
/// is the caller's to report to the originating connection.
pub async fn handle_client_event(
    state: &AppState,
    user_id: Uuid,
    event: ClientEvent,
) -> Result<ServerEvent, FeedError> {
    let event = match event {
        ClientEvent::NewPost {
            content,
            created_at,
        } => state
            .feed
            .create_post(user_id, content, created_at)
            .await
            .map(ServerEvent::NewPostData)?,
        ClientEvent::Like { post_id } => state
            .feed
            .add_like(post_id, user_id)
            .await
            .map(ServerEvent::LikeAdd)?,
        ClientEvent::Unlike { post_id, user_id } => state
            .feed
            .remove_like(post_id, user_id)
            .await
            .map(ServerEvent::LikeRemove)?,
    };

    state.broadcaster.broadcast(event.clone());
    Ok(event)
}

/// Handles an established WebSocket connection.
///
/// Registers the connection, forwards broadcast events to the client, and
/// applies inbound client events. Mutation failures are reported back to
/// this connection as an `error` envelope rather than being swallowed.
async fn handle_websocket(socket: axum::extract::ws::WebSocket, state: AppState, user_id: Uuid) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.broadcaster.subscribe();
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerEvent>(8);

    let connection_id = state.registry.join(user_id);
    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket client connected");

    // Forward broadcast events and direct (error) envelopes to the client.
    let forward_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = event_rx.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(count)) => {
                        warn!(skipped = count, "WebSocket client lagged, skipped events");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Feed broadcaster closed");
                        break;
                    }
                },
                Some(event) = direct_rx.recv() => event,
            };

            match serde_json::to_string(&event) {
                Ok(json) => {
                    trace!(event = event.name(), "Sending event to WebSocket client");
                    if let Err(err) = sender.send(Message::Text(json.into())).await {
                        debug!(error = %err, "Failed to send event to WebSocket client");
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "Failed to serialize event");
                }
            }
        }
    });

    // Apply inbound client events until the client disconnects.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(err) = handle_client_event(&state, user_id, event).await {
                        warn!(user_id = %user_id, error = %err, "Client event failed");
                        let _ = direct_tx
                            .send(ServerEvent::Error {
                                message: err.to_string(),
                            })
                            .await;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "Unparseable client message");
                    let _ = direct_tx
                        .send(ServerEvent::Error {
                            message: format!("invalid message: {err}"),
                        })
                        .await;
                }
            },
            Ok(Message::Close(_)) => {
                debug!("WebSocket client sent close frame");
                break;
            }
            Ok(_) => {
                // Pings are answered by axum; other frames are ignored.
            }
            Err(err) => {
                debug!(error = %err, "WebSocket error");
                break;
            }
        }
    }

    forward_task.abort();
    state.registry.leave(connection_id);
    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket client disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for the health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of live WebSocket connections.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint. No authentication required.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed();

    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.registry.len(),
        uptime_seconds: uptime.as_secs(),
    })
}

// ============================================================================
// Test Support
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::test_support::{test_config, test_state};
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Registers a user through the router and returns the response body.
    async fn register(app: &Router, username: &str) -> Value {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/register",
                json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "hunter2",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    // ========================================================================
    // Health endpoint tests
    // ========================================================================

    #[tokio::test]
    async fn health_returns_ok_status() {
        let state = test_state();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let health = body_json(response).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["connections"], 0);
    }

    // ========================================================================
    // Registration and login tests
    // ========================================================================

    #[tokio::test]
    async fn register_returns_tokens_and_identity() {
        let state = test_state();
        let app = create_router(state.clone());

        let body = register(&app, "alice").await;
        assert_eq!(body["code"], 200);
        assert_eq!(body["username"], "alice");
        assert!(body["profileImage"]
            .as_str()
            .unwrap()
            .starts_with("https://picsum.photos/seed/"));

        let user_id = Uuid::parse_str(body["userID"].as_str().unwrap()).unwrap();
        let access = body["accessToken"].as_str().unwrap();
        assert_eq!(state.tokens.verify_access(access).unwrap(), user_id);

        // The refresh token is persisted on the user record.
        let user = state.store.find_user_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(
            user.refresh_token.as_deref(),
            body["refreshToken"].as_str()
        );
        assert!(!user.verified);
    }

    #[tokio::test]
    async fn register_rejects_duplicate_username() {
        let app = create_router(test_state());
        register(&app, "alice").await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/register",
                json!({
                    "username": "alice",
                    "email": "other@example.com",
                    "password": "different",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
        assert_eq!(body["message"], "User already exists");
        assert!(body.get("accessToken").is_none());
    }

    #[tokio::test]
    async fn register_then_login_succeeds() {
        let app = create_router(test_state());
        let registered = register(&app, "alice").await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/login",
                json!({"username": "alice", "password": "hunter2"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["code"], 200);
        assert_eq!(body["userID"], registered["userID"]);
        assert!(body["accessToken"].is_string());
    }

    #[tokio::test]
    async fn login_with_wrong_password_never_issues_tokens() {
        let app = create_router(test_state());
        register(&app, "alice").await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/login",
                json!({"username": "alice", "password": "wrong"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
        assert_eq!(body["message"], "Invalid credentials");
        assert!(body.get("accessToken").is_none());
        assert!(body.get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn login_with_unknown_username_is_invalid_credentials() {
        let app = create_router(test_state());

        let response = app
            .oneshot(json_request(
                "POST",
                "/login",
                json!({"username": "nobody", "password": "hunter2"}),
            ))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn login_supersedes_prior_refresh_token() {
        let state = test_state();
        let app = create_router(state.clone());
        let registered = register(&app, "alice").await;
        let first_refresh = registered["refreshToken"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/login",
                json!({"username": "alice", "password": "hunter2"}),
            ))
            .await
            .unwrap();
        let _ = body_json(response).await;

        // The first session's refresh token no longer matches the record.
        let response = app
            .oneshot(json_request("POST", "/token", json!({"token": first_refresh})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    // ========================================================================
    // Token exchange and logout tests
    // ========================================================================

    #[tokio::test]
    async fn token_exchange_issues_fresh_access_token() {
        let state = test_state();
        let app = create_router(state.clone());
        let registered = register(&app, "alice").await;
        let refresh = registered["refreshToken"].as_str().unwrap();
        let user_id = Uuid::parse_str(registered["userID"].as_str().unwrap()).unwrap();

        let response = app
            .oneshot(json_request("POST", "/token", json!({"token": refresh})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let access = body["accessToken"].as_str().unwrap();
        assert_eq!(state.tokens.verify_access(access).unwrap(), user_id);
    }

    #[tokio::test]
    async fn token_exchange_without_token_is_401() {
        let app = create_router(test_state());

        let response = app
            .oneshot(json_request("POST", "/token", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_exchange_with_garbage_token_is_403() {
        let app = create_router(test_state());

        let response = app
            .oneshot(json_request("POST", "/token", json!({"token": "garbage"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn token_exchange_with_unknown_subject_is_403() {
        let state = test_state();
        let app = create_router(state.clone());

        // Cryptographically valid, but no user record holds it.
        let refresh = state.tokens.issue_refresh(Uuid::new_v4()).unwrap();
        let response = app
            .oneshot(json_request("POST", "/token", json!({"token": refresh})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token() {
        let app = create_router(test_state());
        let registered = register(&app, "alice").await;
        let refresh = registered["refreshToken"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "DELETE",
                "/logout",
                json!({"token": refresh.clone()}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Logged out successfully");

        // The revoked token can no longer mint access tokens.
        let response = app
            .oneshot(json_request("POST", "/token", json!({"token": refresh})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn logout_without_token_is_401() {
        let app = create_router(test_state());

        let response = app
            .oneshot(json_request("DELETE", "/logout", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let app = create_router(test_state());
        let registered = register(&app, "alice").await;
        let refresh = registered["refreshToken"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(json_request(
                    "DELETE",
                    "/logout",
                    json!({"token": refresh.clone()}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    // ========================================================================
    // Post handler tests
    // ========================================================================

    #[tokio::test]
    async fn create_post_requires_access_token() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/posts",
                json!({"content": "hi", "createdAt": "2026-03-01T12:00:00Z"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/posts")
                    .header("Content-Type", "application/json")
                    .header("Authorization", "Bearer not.a.token")
                    .body(Body::from(
                        json!({"content": "hi", "createdAt": "2026-03-01T12:00:00Z"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_post_stamps_author_and_lists_newest_first() {
        let app = create_router(test_state());
        let registered = register(&app, "alice").await;
        let access = registered["accessToken"].as_str().unwrap();

        for (content, created_at) in [
            ("first", "2026-03-01T12:00:00Z"),
            ("second", "2026-03-01T13:00:00Z"),
        ] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/posts")
                        .header("Content-Type", "application/json")
                        .header("Authorization", format!("Bearer {access}"))
                        .body(Body::from(
                            json!({"content": content, "createdAt": created_at}).to_string(),
                        ))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let body = body_json(response).await;
            assert_eq!(body["code"], 200);
            assert_eq!(body["message"], "Post created successfully");
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/posts/all")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let posts = body_json(response).await;
        let posts = posts.as_array().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0]["content"], "second");
        assert_eq!(posts[1]["content"], "first");
        assert_eq!(posts[0]["user"]["username"], "alice");
    }

    #[tokio::test]
    async fn create_post_broadcasts_to_subscribers() {
        let state = test_state();
        let app = create_router(state.clone());
        let registered = register(&app, "alice").await;
        let access = registered["accessToken"].as_str().unwrap();

        let mut rx = state.broadcaster.subscribe();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/posts")
                    .header("Content-Type", "application/json")
                    .header("Authorization", format!("Bearer {access}"))
                    .body(Body::from(
                        json!({"content": "hi", "createdAt": "2026-03-01T12:00:00Z"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = rx.try_recv().unwrap();
        let ServerEvent::NewPostData(post) = event else {
            panic!("expected NewPostData, got {event:?}");
        };
        assert_eq!(post.content, "hi");
        assert_eq!(post.user.unwrap().username, "alice");
    }

    // ========================================================================
    // User endpoint tests
    // ========================================================================

    #[tokio::test]
    async fn get_user_returns_profile() {
        let app = create_router(test_state());
        let registered = register(&app, "alice").await;
        let user_id = registered["userID"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/user/{user_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["code"], 200);
        assert_eq!(body["message"], "User found");
        assert_eq!(body["username"], "alice");
        assert_eq!(body["verified"], false);
        assert!(body["posts"].as_array().unwrap().is_empty());
        // The password digest and refresh token never leave the store.
        assert!(body.get("password").is_none());
        assert!(body.get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn get_unknown_user_is_404_body() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/user/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["code"], 404);
        assert_eq!(body["message"], "User not found");
    }

    #[tokio::test]
    async fn get_user_with_malformed_id_is_404_body() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/user/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn get_user_posts_filters_by_author() {
        let state = test_state();
        let app = create_router(state.clone());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;

        for (user, content) in [(&alice, "from alice"), (&bob, "from bob")] {
            let access = user["accessToken"].as_str().unwrap();
            app.clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/posts")
                        .header("Content-Type", "application/json")
                        .header("Authorization", format!("Bearer {access}"))
                        .body(Body::from(
                            json!({"content": content, "createdAt": "2026-03-01T12:00:00Z"})
                                .to_string(),
                        ))
                        .unwrap(),
                )
                .await
                .unwrap();
        }

        let alice_id = alice["userID"].as_str().unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/user/{alice_id}/posts"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let posts = body_json(response).await;
        let posts = posts.as_array().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["content"], "from alice");

        // Malformed id yields an empty listing.
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/user/not-a-uuid/posts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let posts = body_json(response).await;
        assert!(posts.as_array().unwrap().is_empty());
    }

    // ========================================================================
    // Client event tests
    // ========================================================================

    #[tokio::test]
    async fn client_like_event_broadcasts_updated_post() {
        let state = test_state();
        let app = create_router(state.clone());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        let bob_id = Uuid::parse_str(bob["userID"].as_str().unwrap()).unwrap();
        let alice_id = Uuid::parse_str(alice["userID"].as_str().unwrap()).unwrap();

        let post = state
            .feed
            .create_post(alice_id, "hi".to_string(), Utc::now())
            .await
            .unwrap();

        let mut rx = state.broadcaster.subscribe();

        let event = handle_client_event(&state, bob_id, ClientEvent::Like { post_id: post.id })
            .await
            .unwrap();
        let ServerEvent::LikeAdd(updated) = event else {
            panic!("expected LikeAdd");
        };
        assert_eq!(updated.likes, vec![bob_id]);

        let received = rx.try_recv().unwrap();
        assert_eq!(received, ServerEvent::LikeAdd(updated));
    }

    #[tokio::test]
    async fn client_like_event_is_idempotent_across_duplicates() {
        let state = test_state();
        let app = create_router(state.clone());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        let bob_id = Uuid::parse_str(bob["userID"].as_str().unwrap()).unwrap();
        let alice_id = Uuid::parse_str(alice["userID"].as_str().unwrap()).unwrap();

        let post = state
            .feed
            .create_post(alice_id, "hi".to_string(), Utc::now())
            .await
            .unwrap();

        for _ in 0..2 {
            let event =
                handle_client_event(&state, bob_id, ClientEvent::Like { post_id: post.id })
                    .await
                    .unwrap();
            let ServerEvent::LikeAdd(updated) = event else {
                panic!("expected LikeAdd");
            };
            assert_eq!(updated.likes, vec![bob_id]);
        }
    }

    #[tokio::test]
    async fn client_event_on_missing_post_fails_without_broadcast() {
        let state = test_state();
        let mut rx = state.broadcaster.subscribe();

        let err = handle_client_event(
            &state,
            Uuid::new_v4(),
            ClientEvent::Like {
                post_id: Uuid::new_v4(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            FeedError::Store(StoreError::PostNotFound(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn client_unlike_event_targets_payload_user() {
        let state = test_state();
        let app = create_router(state.clone());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        let bob_id = Uuid::parse_str(bob["userID"].as_str().unwrap()).unwrap();
        let alice_id = Uuid::parse_str(alice["userID"].as_str().unwrap()).unwrap();

        let post = state
            .feed
            .create_post(alice_id, "hi".to_string(), Utc::now())
            .await
            .unwrap();
        state.feed.add_like(post.id, bob_id).await.unwrap();

        // alice's connection removes bob's like: the payload user id wins.
        let event = handle_client_event(
            &state,
            alice_id,
            ClientEvent::Unlike {
                post_id: post.id,
                user_id: bob_id,
            },
        )
        .await
        .unwrap();
        let ServerEvent::LikeRemove(updated) = event else {
            panic!("expected LikeRemove");
        };
        assert!(updated.likes.is_empty());
    }

    // ========================================================================
    // AppState tests
    // ========================================================================

    #[test]
    fn app_state_from_config_dispatches_store() {
        let state = AppState::from_config(test_config()).unwrap();
        assert_eq!(state.registry.len(), 0);

        let mut config = test_config();
        config.store_url = "postgres://localhost/feed".to_string();
        assert!(AppState::from_config(config).is_err());
    }

    #[test]
    fn app_state_debug_impl() {
        let state = test_state();
        let debug_str = format!("{state:?}");
        assert!(debug_str.contains("AppState"));
    }
}
