//! # Core Traits (Ports)
//!
//! Any storage adapter must implement these traits to be used by the services.

use async_trait::async_trait;

use crate::errors::DomainResult;
use crate::models::{Category, CategoryView, NewCategory, NewPost, Post, PostNumber, ThreadView};

/// Resource names used as the second half of a rate-limit key.
pub mod resources {
    /// Creating a thread or a reply.
    pub const CREATE_POST: &str = "post";
    /// Registering an account.
    pub const SIGN_UP: &str = "signup";
}

/// Builds the rate-limit key for an identifier and resource, so the same
/// client is throttled independently per resource.
pub fn rate_limit_key(identifier: &str, resource: &str) -> String {
    format!("{identifier}:{resource}")
}

/// Persistence contract for categories and posts.
///
/// Implementations must serialize writers to the same category on the
/// backing store's own lock (never an in-process one), assign numbers from
/// the category counter in lock-grant order, and make every write and
/// cascade all-or-nothing, including when the returned future is dropped.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BoardRepository: Send + Sync {
    // Category Operations
    async fn create_category(&self, category: NewCategory) -> DomainResult<Category>;
    async fn get_category(&self, tag: &str) -> DomainResult<Category>;
    async fn list_categories(&self) -> DomainResult<Vec<Category>>;
    async fn get_category_view(&self, tag: &str) -> DomainResult<CategoryView>;

    /// Removes every post of the category, then the category itself.
    /// Returns posts removed + 1, or 0 when the category does not exist.
    async fn remove_category(&self, tag: &str) -> DomainResult<u64>;

    // Post Operations

    /// Locks the category counter, inserts the post under the current
    /// counter value, advances the counter and commits.
    /// Unknown category and unknown parent both yield `NotFound`.
    async fn write_post(&self, post: NewPost) -> DomainResult<PostNumber>;
    async fn get_post(&self, tag: &str, num: PostNumber) -> DomainResult<Post>;
    async fn get_thread_view(&self, tag: &str, root: PostNumber) -> DomainResult<ThreadView>;

    /// Removes one post; a thread root takes its replies with it.
    /// Returns the number of rows removed, 0 when the post does not exist.
    async fn remove_post(&self, tag: &str, num: PostNumber) -> DomainResult<u64>;
}

/// Short-lived, TTL-based throttle keyed by (identifier, resource).
///
/// `is_limited` followed by `limit` is two independent calls: concurrent
/// callers can both observe "not limited" before either sets the entry.
/// A single set-if-absent-with-TTL (`SET key 1 NX PX ms`) would close that
/// window, but callers currently rely on the best-effort behaviour.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// True while a non-expired entry exists for the key.
    async fn is_limited(&self, identifier: &str, resource: &str) -> DomainResult<bool>;

    /// Creates or refreshes the entry for `duration_ms`.
    /// A duration of zero or less does nothing.
    async fn limit(&self, identifier: &str, resource: &str, duration_ms: i64) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_key_is_scoped_per_resource() {
        assert_eq!(rate_limit_key("10.0.0.1", resources::CREATE_POST), "10.0.0.1:post");
        assert_ne!(
            rate_limit_key("10.0.0.1", resources::CREATE_POST),
            rate_limit_key("10.0.0.1", resources::SIGN_UP)
        );
    }
}
