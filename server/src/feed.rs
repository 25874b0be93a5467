//! Feed mutations: post creation, likes, and listing policy.
//!
//! The [`FeedMutator`] applies validated mutations to the store and owns the
//! feed's read policy (newest-created-first listing, author filtering). It
//! does not broadcast; callers hand the resulting post to the hub so that
//! mutation and fan-out stay separable.
//!
//! # Two-phase post creation
//!
//! Creating a post is two writes without a transaction: the post document
//! itself, then the author bookkeeping (post-list append and denormalized
//! author snapshot). If the second phase fails the post exists without
//! author metadata. That state is surfaced as [`FeedError::AuthorStamp`]
//! with the orphaned post id, logged for an operator, and never retried or
//! silently hidden.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::store::{FeedStore, StoreError};
use crate::types::{AuthorSnapshot, Post};

/// Errors from feed mutations.
#[derive(Debug, Error)]
pub enum FeedError {
    /// A persistence call failed outright.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The post was created but the author bookkeeping write failed,
    /// leaving the post without its author stamp. Recoverable by an
    /// operator; the post id names the orphan.
    #[error("post {post_id} created without author stamp: {source}")]
    AuthorStamp {
        post_id: Uuid,
        #[source]
        source: StoreError,
    },
}

/// Applies feed mutations against the storage capability.
#[derive(Clone)]
pub struct FeedMutator {
    store: Arc<dyn FeedStore>,
}

impl FeedMutator {
    /// Creates a mutator over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    /// Creates a post authored by `author_id`.
    ///
    /// Phase one persists the post with empty likes and comments. Phase two
    /// loads the author, appends the new post id to their post list, and
    /// stamps the post with an author snapshot captured at this instant.
    pub async fn create_post(
        &self,
        author_id: Uuid,
        content: String,
        created_at: DateTime<Utc>,
    ) -> Result<Post, FeedError> {
        let post = self.store.create_post(Post::new(content, created_at)).await?;

        let stamped = self.stamp_author(post.id, author_id).await;
        match stamped {
            Ok(post) => {
                debug!(post_id = %post.id, author_id = %author_id, "Post created");
                Ok(post)
            }
            Err(source) => {
                error!(
                    post_id = %post.id,
                    author_id = %author_id,
                    error = %source,
                    "Post created but author stamp failed"
                );
                Err(FeedError::AuthorStamp {
                    post_id: post.id,
                    source,
                })
            }
        }
    }

    /// Phase two of post creation: author bookkeeping.
    async fn stamp_author(&self, post_id: Uuid, author_id: Uuid) -> Result<Post, StoreError> {
        let author = self
            .store
            .find_user_by_id(author_id)
            .await?
            .ok_or(StoreError::UserNotFound(author_id))?;

        self.store.append_user_post(author_id, post_id).await?;
        self.store
            .stamp_post_author(post_id, AuthorSnapshot::of(&author))
            .await
    }

    /// Adds `user_id` to the post's like set.
    ///
    /// Idempotent: liking an already-liked post returns the post unchanged.
    /// Uniqueness is enforced by the store, not by a read-then-write here,
    /// so concurrent double-taps cannot produce a duplicate membership.
    pub async fn add_like(&self, post_id: Uuid, user_id: Uuid) -> Result<Post, FeedError> {
        let post = self.store.add_like(post_id, user_id).await?;
        debug!(post_id = %post_id, user_id = %user_id, likes = post.likes.len(), "Like added");
        Ok(post)
    }

    /// Removes `user_id` from the post's like set. No-op if absent.
    pub async fn remove_like(&self, post_id: Uuid, user_id: Uuid) -> Result<Post, FeedError> {
        let post = self.store.remove_like(post_id, user_id).await?;
        debug!(post_id = %post_id, user_id = %user_id, likes = post.likes.len(), "Like removed");
        Ok(post)
    }

    /// Returns all posts, newest created first.
    pub async fn list_posts(&self) -> Result<Vec<Post>, FeedError> {
        let mut posts = self.store.list_posts().await?;
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    /// Returns the posts authored by `author_id`, newest created first.
    ///
    /// Filters the full listing on the denormalized author-snapshot id
    /// rather than dereferencing the author's post-id list, so the two can
    /// become sources of truth independently. An author-id index in the
    /// store would serve the same observable results more cheaply.
    pub async fn posts_by_author(&self, author_id: Uuid) -> Result<Vec<Post>, FeedError> {
        let posts = self.list_posts().await?;
        Ok(posts
            .into_iter()
            .filter(|post| post.user.as_ref().is_some_and(|user| user.id == author_id))
            .collect())
    }
}

impl std::fmt::Debug for FeedMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedMutator").finish_non_exhaustive()
    }
}
