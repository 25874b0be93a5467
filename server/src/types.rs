//! Shared domain and wire types for the Ripple server.
//!
//! This module defines the persistent entities (users and posts) and the
//! message envelopes exchanged over the realtime connection. Wire-facing
//! structs serialize with `camelCase` keys to match the JSON API contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base URL of the external placeholder avatar generator.
///
/// Profile images are stamped once at registration as
/// `{AVATAR_BASE_URL}/{user_id}/200` and never refreshed.
pub const AVATAR_BASE_URL: &str = "https://picsum.photos/seed";

/// Builds the placeholder avatar URL for a user id.
#[must_use]
pub fn avatar_url(user_id: Uuid) -> String {
    format!("{AVATAR_BASE_URL}/{user_id}/200")
}

/// A registered user.
///
/// This type is store-internal and deliberately does NOT implement
/// [`Serialize`]: the password digest and the live refresh token must never
/// reach a wire format. Handlers project the public fields into their own
/// response types instead.
#[derive(Debug, Clone)]
pub struct User {
    /// Stable unique identifier.
    pub id: Uuid,

    /// Unique login name.
    pub username: String,

    /// Contact email, captured at registration.
    pub email: String,

    /// bcrypt digest of the password. Never the cleartext.
    pub password_hash: String,

    /// Placeholder avatar URL, stamped at registration.
    pub profile_image: String,

    /// Whether the account has been verified. Defaults to false.
    pub verified: bool,

    /// The single live refresh token for this user, if any.
    ///
    /// At most one value is live at a time: a new login overwrites it and a
    /// logout clears it, which revokes every previously issued refresh token
    /// without a blocklist.
    pub refresh_token: Option<String>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// Ordered identifiers of the posts this user has authored.
    pub posts: Vec<Uuid>,
}

impl User {
    /// Creates a new unverified user with no posts and no live session.
    #[must_use]
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            username,
            email,
            password_hash,
            profile_image: avatar_url(id),
            verified: false,
            refresh_token: None,
            created_at: Utc::now(),
            posts: Vec::new(),
        }
    }
}

/// Denormalized author data embedded in a post at creation time.
///
/// This is a snapshot, not a live reference: it captures the author's state
/// at the instant the post was created and is intentionally allowed to drift
/// from the live [`User`] record afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSnapshot {
    /// Author's username at creation time.
    pub username: String,

    /// Author's avatar URL at creation time.
    pub profile_image: String,

    /// The author's stable identifier.
    pub id: Uuid,

    /// Author's verification flag at creation time.
    pub verified: bool,
}

impl AuthorSnapshot {
    /// Captures a snapshot of the given user.
    #[must_use]
    pub fn of(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            profile_image: user.profile_image.clone(),
            id: user.id,
            verified: user.verified,
        }
    }
}

/// A short message posted to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Stable unique identifier.
    pub id: Uuid,

    /// Message body.
    pub content: String,

    /// Creation timestamp, supplied by the client.
    pub created_at: DateTime<Utc>,

    /// Author snapshot, stamped in the second phase of post creation.
    ///
    /// `None` only in the window where the post was persisted but the
    /// author-stamp write failed (a surfaced, recoverable inconsistency).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthorSnapshot>,

    /// Identifiers of users who like this post. No duplicates: the store
    /// enforces set semantics on insertion.
    pub likes: Vec<Uuid>,

    /// Comment references. Present for extension, unused by the core.
    pub comments: Vec<Uuid>,
}

impl Post {
    /// Creates a new post with empty likes and comments and no author stamp.
    #[must_use]
    pub fn new(content: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            created_at,
            user: None,
            likes: Vec::new(),
            comments: Vec::new(),
        }
    }
}

/// Messages a client may send over the realtime connection.
///
/// Wire format: `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Create a new post as the connection's authenticated user.
    #[serde(rename_all = "camelCase")]
    NewPost {
        content: String,
        created_at: DateTime<Utc>,
    },

    /// Add the connection's authenticated user to a post's likes.
    Like {
        #[serde(rename = "postID")]
        post_id: Uuid,
    },

    /// Remove a user from a post's likes.
    ///
    /// The target user id travels in the payload, matching the wire protocol
    /// this server is compatible with.
    Unlike {
        #[serde(rename = "postID")]
        post_id: Uuid,
        #[serde(rename = "userID")]
        user_id: Uuid,
    },
}

/// Messages the server pushes to connected clients.
///
/// Mutation events carry the full updated [`Post`] rather than a delta, so a
/// client can replace its cached copy wholesale without merge logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A post was created. Broadcast to all connections.
    NewPostData(Post),

    /// A like was added. Broadcast to all connections.
    LikeAdd(Post),

    /// A like was removed. Broadcast to all connections.
    LikeRemove(Post),

    /// A mutation requested by this connection failed. Sent only to the
    /// originating connection, never broadcast.
    Error { message: String },
}

impl ServerEvent {
    /// Short name of the event as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewPostData(_) => "newPostData",
            Self::LikeAdd(_) => "likeAdd",
            Self::LikeRemove(_) => "likeRemove",
            Self::Error { .. } => "error",
        }
    }
}
