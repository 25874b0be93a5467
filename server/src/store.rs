//! Storage capability for users and posts.
//!
//! Persistence is an external collaborator behind the [`FeedStore`] trait:
//! the rest of the server invokes CRUD operations against it and never
//! assumes a concrete backend. The crate ships [`MemoryStore`], the
//! single-process implementation; remote adapters plug in behind the same
//! trait and are selected by the configured store URL scheme.
//!
//! # Atomicity
//!
//! The store provides atomic single-document read/write but no
//! cross-document transactions. Like-set membership is enforced HERE, under
//! one write lock, rather than by the caller's read-then-write: under
//! concurrent handlers the store is the final arbiter of uniqueness.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::types::{AuthorSnapshot, Post, User};

/// Storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The referenced user does not exist.
    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    /// The referenced post does not exist.
    #[error("post not found: {0}")]
    PostNotFound(Uuid),

    /// Registration collided with an existing username.
    #[error("username already taken: {0}")]
    UsernameTaken(String),

    /// The configured store URL names no known backend.
    #[error("unsupported store scheme: {0}")]
    UnsupportedScheme(String),
}

/// Trait for user and post storage.
#[async_trait]
pub trait FeedStore: Send + Sync + std::fmt::Debug {
    /// Persists a new user. Fails with [`StoreError::UsernameTaken`] if the
    /// username is already in use.
    async fn create_user(&self, user: User) -> Result<User, StoreError>;

    /// Looks up a user by id.
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Looks up a user by username.
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Overwrites (or clears) the user's stored refresh token, superseding
    /// any previously issued value.
    async fn set_refresh_token(
        &self,
        user_id: Uuid,
        token: Option<String>,
    ) -> Result<(), StoreError>;

    /// Clears the refresh token on whichever user currently holds the given
    /// value. Returns `true` if a user matched.
    async fn revoke_refresh_token(&self, token: &str) -> Result<bool, StoreError>;

    /// Appends a post id to the user's ordered post list.
    async fn append_user_post(&self, user_id: Uuid, post_id: Uuid) -> Result<(), StoreError>;

    /// Persists a new post.
    async fn create_post(&self, post: Post) -> Result<Post, StoreError>;

    /// Looks up a post by id.
    async fn find_post(&self, id: Uuid) -> Result<Option<Post>, StoreError>;

    /// Stamps the denormalized author snapshot onto a post and returns the
    /// updated post.
    async fn stamp_post_author(
        &self,
        post_id: Uuid,
        author: AuthorSnapshot,
    ) -> Result<Post, StoreError>;

    /// Adds a user to a post's like set and returns the updated post.
    ///
    /// Set semantics: inserting an existing member is a no-op. The check and
    /// the insert happen under a single write lock.
    async fn add_like(&self, post_id: Uuid, user_id: Uuid) -> Result<Post, StoreError>;

    /// Removes a user from a post's like set and returns the updated post.
    /// Removing a non-member is a no-op.
    async fn remove_like(&self, post_id: Uuid, user_id: Uuid) -> Result<Post, StoreError>;

    /// Returns all posts, in no particular order. Ordering is listing
    /// policy and belongs to the caller.
    async fn list_posts(&self) -> Result<Vec<Post>, StoreError>;
}

/// Creates a store from a connection string, dispatching on the URL scheme.
///
/// `mem://` selects the in-process [`MemoryStore`]. Unknown schemes fail
/// fast so a misconfigured deployment dies at startup rather than serving
/// from an unintended backend.
pub fn from_url(url: &str) -> Result<Arc<dyn FeedStore>, StoreError> {
    match url.split_once("://") {
        Some(("mem", _)) => {
            debug!(url, "Using in-process memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        _ => Err(StoreError::UnsupportedScheme(url.to_string())),
    }
}

/// Mutable store contents, guarded by one lock.
#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    posts: HashMap<Uuid, Post>,
}

/// Thread-safe in-memory implementation of [`FeedStore`].
///
/// Every operation takes the lock once and performs its full
/// check-and-mutate inside it, which is what gives the like set its
/// set-semantics guarantee under concurrent handlers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let mut inner = self.inner.write().unwrap();

        if inner
            .users
            .values()
            .any(|existing| existing.username == user.username)
        {
            return Err(StoreError::UsernameTaken(user.username));
        }

        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn set_refresh_token(
        &self,
        user_id: Uuid,
        token: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.refresh_token = token;
        Ok(())
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let holder = inner
            .users
            .values_mut()
            .find(|user| user.refresh_token.as_deref() == Some(token));

        match holder {
            Some(user) => {
                user.refresh_token = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_user_post(&self, user_id: Uuid, post_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.posts.push(post_id);
        Ok(())
    }

    async fn create_post(&self, post: Post) -> Result<Post, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.posts.get(&id).cloned())
    }

    async fn stamp_post_author(
        &self,
        post_id: Uuid,
        author: AuthorSnapshot,
    ) -> Result<Post, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let post = inner
            .posts
            .get_mut(&post_id)
            .ok_or(StoreError::PostNotFound(post_id))?;
        post.user = Some(author);
        Ok(post.clone())
    }

    async fn add_like(&self, post_id: Uuid, user_id: Uuid) -> Result<Post, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let post = inner
            .posts
            .get_mut(&post_id)
            .ok_or(StoreError::PostNotFound(post_id))?;

        if !post.likes.contains(&user_id) {
            post.likes.push(user_id);
        }
        Ok(post.clone())
    }

    async fn remove_like(&self, post_id: Uuid, user_id: Uuid) -> Result<Post, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let post = inner
            .posts
            .get_mut(&post_id)
            .ok_or(StoreError::PostNotFound(post_id))?;

        if let Some(index) = post.likes.iter().position(|id| *id == user_id) {
            post.likes.remove(index);
        }
        Ok(post.clone())
    }

    async fn list_posts(&self) -> Result<Vec<Post>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.posts.values().cloned().collect())
    }
}
