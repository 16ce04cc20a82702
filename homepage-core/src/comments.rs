use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::clock::SharedClock;
use crate::error::CommentError;
use crate::rate_limit::RateLimiter;

const MAX_NAME_CHARS: usize = 50;
const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewComment {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    pub post_slug: String,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Narrow read/write view of the persistent comment store.
#[async_trait]
pub trait CommentStore: Send + Sync + 'static {
    async fn list(&self, post_slug: &str) -> Result<Vec<Comment>, CommentError>;
    async fn insert(
        &self,
        post_slug: &str,
        comment: NewComment,
        created_at: DateTime<Utc>,
    ) -> Result<Comment, CommentError>;
}

#[derive(Debug, Default)]
struct StoreData {
    next_id: u64,
    by_post: HashMap<String, Vec<Comment>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCommentStore {
    inner: Arc<RwLock<StoreData>>,
}

impl InMemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn list(&self, post_slug: &str) -> Result<Vec<Comment>, CommentError> {
        let inner = self.inner.read().await;
        Ok(inner.by_post.get(post_slug).cloned().unwrap_or_default())
    }

    async fn insert(
        &self,
        post_slug: &str,
        comment: NewComment,
        created_at: DateTime<Utc>,
    ) -> Result<Comment, CommentError> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let stored = Comment {
            id: inner.next_id,
            post_slug: post_slug.to_owned(),
            name: comment.name,
            content: comment.content,
            created_at,
        };
        inner
            .by_post
            .entry(post_slug.to_owned())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }
}

/// Comment submission guarded by the per-identity rate limiter.
#[derive(Clone)]
pub struct CommentService {
    limiter: RateLimiter,
    store: Arc<dyn CommentStore>,
    clock: SharedClock,
}

impl CommentService {
    pub fn new(limiter: RateLimiter, store: Arc<dyn CommentStore>, clock: SharedClock) -> Self {
        Self {
            limiter,
            store,
            clock,
        }
    }

    pub async fn list(&self, post_slug: &str) -> Result<Vec<Comment>, CommentError> {
        self.store.list(post_slug).await
    }

    /// Throttling is checked before validation, so malformed floods count
    /// against the sender too.
    pub async fn submit(
        &self,
        identity: &str,
        post_slug: &str,
        comment: NewComment,
    ) -> Result<Comment, CommentError> {
        if !self.limiter.try_acquire(identity) {
            return Err(CommentError::RateLimited {
                retry_after_secs: self.limiter.retry_after_secs(),
            });
        }

        let comment = validate(comment)?;
        let stored = self
            .store
            .insert(post_slug, comment, self.clock.now())
            .await?;
        info!(post = %post_slug, id = stored.id, "comment stored");
        Ok(stored)
    }
}

impl std::fmt::Debug for CommentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentService")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

fn validate(comment: NewComment) -> Result<NewComment, CommentError> {
    let name = comment.name.trim();
    let content = comment.content.trim();

    if name.is_empty() {
        return Err(CommentError::Invalid("name is required"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(CommentError::Invalid("name is too long"));
    }
    if content.is_empty() {
        return Err(CommentError::Invalid("content is required"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(CommentError::Invalid("content is too long"));
    }

    Ok(NewComment {
        name: name.to_owned(),
        content: content.to_owned(),
    })
}
