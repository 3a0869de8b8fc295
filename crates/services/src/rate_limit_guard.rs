//! Check-then-set throttle in front of write operations.

use std::sync::Arc;

use domains::{DomainError, DomainResult, RateLimiter};

/// Rejects an identifier that is currently throttled for a resource, and
/// otherwise throttles it for the given duration before letting it through.
///
/// The check and the set are two round trips to the limiter, so a burst of
/// simultaneous requests may all pass; sustained traffic is still bounded.
/// Limiter failures reject the request instead of skipping the throttle.
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }

    pub async fn check_and_limit(&self, identifier: &str, resource: &str, duration_ms: i64) -> DomainResult<()> {
        if self.limiter.is_limited(identifier, resource).await? {
            tracing::debug!(identifier, resource, "request rate limited");
            return Err(DomainError::RateLimited(format!("too many {resource} requests")));
        }
        self.limiter.limit(identifier, resource, duration_ms).await
    }

    pub async fn is_rate_limited(&self, identifier: &str, resource: &str) -> DomainResult<bool> {
        self.limiter.is_limited(identifier, resource).await
    }

    pub async fn rate_limit(&self, identifier: &str, resource: &str, duration_ms: i64) -> DomainResult<()> {
        self.limiter.limit(identifier, resource, duration_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::resources::SIGN_UP;
    use domains::MockRateLimiter;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_unthrottled_request_sets_limit() {
        let mut limiter = MockRateLimiter::new();
        limiter.expect_is_limited().times(1).returning(|_, _| Ok(false));
        limiter
            .expect_limit()
            .times(1)
            .withf(|_, _, duration_ms| *duration_ms == 5_000)
            .returning(|_, _, _| Ok(()));

        let guard = RateLimitGuard::new(Arc::new(limiter));
        assert_ok!(guard.check_and_limit("1.2.3.4", SIGN_UP, 5_000).await);
    }

    #[tokio::test]
    async fn test_throttled_request_is_rejected_without_refresh() {
        let mut limiter = MockRateLimiter::new();
        limiter.expect_is_limited().times(1).returning(|_, _| Ok(true));
        limiter.expect_limit().never();

        let guard = RateLimitGuard::new(Arc::new(limiter));
        let err = assert_err!(guard.check_and_limit("1.2.3.4", SIGN_UP, 5_000).await);
        assert!(matches!(err, DomainError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_limiter_failure_rejects_request() {
        let mut limiter = MockRateLimiter::new();
        limiter
            .expect_is_limited()
            .returning(|_, _| Err(DomainError::Internal("redis down".into())));
        limiter.expect_limit().never();

        let guard = RateLimitGuard::new(Arc::new(limiter));
        let err = assert_err!(guard.check_and_limit("1.2.3.4", SIGN_UP, 5_000).await);
        assert!(matches!(err, DomainError::Internal(_)));
    }
}
