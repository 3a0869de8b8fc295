//! # BoardService
//!
//! The entry point the request layer calls into. Writes pass the rate-limit
//! guard first, then run against the repository under one deadline that
//! covers the whole allocate/insert/advance (or cascade) unit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use domains::resources::CREATE_POST;
use domains::{
    BoardRepository, Category, CategoryView, DomainError, DomainResult, NewCategory, NewPost, Post,
    PostNumber, RateLimiter, ThreadView,
};

use crate::rate_limit_guard::RateLimitGuard;

/// Throttling and latency bounds applied to write operations.
#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    /// How long an address is throttled after a successful post check.
    pub post_cooldown_ms: i64,
    /// Deadline for a whole write or cascade unit.
    pub write_timeout: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            post_cooldown_ms: 30_000,
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Runs `unit` to completion or fails it with `Internal` once `limit` passes.
///
/// On timeout the unit's future is dropped, which rolls back any open
/// transaction it holds.
pub async fn with_deadline<T, F>(limit: Duration, operation: &'static str, unit: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match tokio::time::timeout(limit, unit).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "operation timed out");
            Err(DomainError::Internal(format!("{operation} timed out")))
        }
    }
}

#[derive(Clone)]
pub struct BoardService {
    repo: Arc<dyn BoardRepository>,
    guard: RateLimitGuard,
    policy: WritePolicy,
}

impl BoardService {
    pub fn new(repo: Arc<dyn BoardRepository>, limiter: Arc<dyn RateLimiter>, policy: WritePolicy) -> Self {
        Self {
            repo,
            guard: RateLimitGuard::new(limiter),
            policy,
        }
    }

    pub fn guard(&self) -> &RateLimitGuard {
        &self.guard
    }

    /// Throttles the poster's address, then writes the post.
    /// Returns the number assigned to it.
    pub async fn submit_post(&self, post: NewPost) -> DomainResult<PostNumber> {
        self.guard
            .check_and_limit(&post.ip, CREATE_POST, self.policy.post_cooldown_ms)
            .await?;
        self.write_post(post).await
    }

    /// Writes a post without consulting the rate limiter.
    pub async fn write_post(&self, post: NewPost) -> DomainResult<PostNumber> {
        with_deadline(self.policy.write_timeout, "write_post", self.repo.write_post(post)).await
    }

    pub async fn get_post(&self, tag: &str, num: PostNumber) -> DomainResult<Post> {
        self.repo.get_post(tag, num).await
    }

    pub async fn get_thread_view(&self, tag: &str, root: PostNumber) -> DomainResult<ThreadView> {
        self.repo.get_thread_view(tag, root).await
    }

    pub async fn get_category_view(&self, tag: &str) -> DomainResult<CategoryView> {
        self.repo.get_category_view(tag).await
    }

    pub async fn get_category(&self, tag: &str) -> DomainResult<Category> {
        self.repo.get_category(tag).await
    }

    pub async fn list_categories(&self) -> DomainResult<Vec<Category>> {
        self.repo.list_categories().await
    }

    pub async fn create_category(&self, category: NewCategory) -> DomainResult<Category> {
        self.repo.create_category(category).await
    }

    pub async fn remove_post(&self, tag: &str, num: PostNumber) -> DomainResult<u64> {
        with_deadline(self.policy.write_timeout, "remove_post", self.repo.remove_post(tag, num)).await
    }

    pub async fn remove_category(&self, tag: &str) -> DomainResult<u64> {
        with_deadline(self.policy.write_timeout, "remove_category", self.repo.remove_category(tag)).await
    }

    pub async fn is_rate_limited(&self, identifier: &str, resource: &str) -> DomainResult<bool> {
        self.guard.is_rate_limited(identifier, resource).await
    }

    pub async fn rate_limit(&self, identifier: &str, resource: &str, duration_ms: i64) -> DomainResult<()> {
        self.guard.rate_limit(identifier, resource, duration_ms).await
    }
}
