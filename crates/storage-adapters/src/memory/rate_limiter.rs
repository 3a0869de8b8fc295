//! In-process [`RateLimiter`] with per-key deadlines.
//!
//! Used when no Redis is configured and in tests. Expired entries are
//! dropped lazily on lookup, and every call sweeps the whole map once
//! `purge_interval` has passed since the last sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use domains::{rate_limit_key, DomainResult, RateLimiter};
use tokio::time::Instant;

const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub struct MemoryRateLimiter {
    deadlines: DashMap<String, Instant>,
    purge_interval: Duration,
    started: Instant,
    /// Milliseconds after `started` at which the last sweep ran.
    last_purge_ms: AtomicU64,
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(purge_interval: Duration) -> Self {
        Self {
            deadlines: DashMap::new(),
            purge_interval,
            started: Instant::now(),
            last_purge_ms: AtomicU64::new(0),
        }
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.deadlines.len();
        self.deadlines.retain(|_, deadline| *deadline > now);
        let dropped = before.saturating_sub(self.deadlines.len());
        if dropped > 0 {
            tracing::debug!(dropped, "purged expired rate limit entries");
        }
        dropped
    }

    /// Sweeps the map when the purge interval has elapsed. Only the caller
    /// that wins the timestamp swap runs the sweep.
    fn purge_if_due(&self, now: Instant) {
        let elapsed = now.duration_since(self.started).as_millis() as u64;
        let last = self.last_purge_ms.load(Ordering::Relaxed);
        if elapsed.saturating_sub(last) < self.purge_interval.as_millis() as u64 {
            return;
        }
        if self
            .last_purge_ms
            .compare_exchange(last, elapsed, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_expired();
        }
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn is_limited(&self, identifier: &str, resource: &str) -> DomainResult<bool> {
        let key = rate_limit_key(identifier, resource);
        let now = Instant::now();
        self.purge_if_due(now);
        let live = match self.deadlines.get(&key) {
            Some(deadline) => *deadline > now,
            None => return Ok(false),
        };
        if !live {
            self.deadlines.remove_if(&key, |_, deadline| *deadline <= now);
        }
        Ok(live)
    }

    async fn limit(&self, identifier: &str, resource: &str, duration_ms: i64) -> DomainResult<()> {
        if duration_ms <= 0 {
            return Ok(());
        }
        let now = Instant::now();
        self.purge_if_due(now);
        let deadline = now + Duration::from_millis(duration_ms as u64);
        self.deadlines.insert(rate_limit_key(identifier, resource), deadline);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::resources::{CREATE_POST, SIGN_UP};

    #[tokio::test]
    async fn test_limit_expires() {
        let limiter = MemoryRateLimiter::new();
        assert!(!limiter.is_limited("1.2.3.4", CREATE_POST).await.unwrap());

        limiter.limit("1.2.3.4", CREATE_POST, 50).await.unwrap();
        assert!(limiter.is_limited("1.2.3.4", CREATE_POST).await.unwrap());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!limiter.is_limited("1.2.3.4", CREATE_POST).await.unwrap());
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn test_non_positive_duration_is_noop() {
        let limiter = MemoryRateLimiter::new();
        limiter.limit("1.2.3.4", CREATE_POST, 0).await.unwrap();
        limiter.limit("1.2.3.4", CREATE_POST, -10).await.unwrap();
        assert!(!limiter.is_limited("1.2.3.4", CREATE_POST).await.unwrap());
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn test_resources_are_independent() {
        let limiter = MemoryRateLimiter::new();
        limiter.limit("1.2.3.4", SIGN_UP, 60_000).await.unwrap();
        assert!(limiter.is_limited("1.2.3.4", SIGN_UP).await.unwrap());
        assert!(!limiter.is_limited("1.2.3.4", CREATE_POST).await.unwrap());
        assert!(!limiter.is_limited("5.6.7.8", SIGN_UP).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let limiter = MemoryRateLimiter::new();
        limiter.limit("a", CREATE_POST, 10).await.unwrap();
        limiter.limit("b", CREATE_POST, 60_000).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_swept_without_revisiting_keys() {
        let limiter = MemoryRateLimiter::with_purge_interval(Duration::from_millis(10));
        for i in 0..1_000 {
            limiter.limit(&format!("10.0.{}.{}", i / 256, i % 256), CREATE_POST, 1).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        for i in 0..10 {
            let ip = format!("172.16.0.{i}");
            assert!(!limiter.is_limited(&ip, CREATE_POST).await.unwrap());
            limiter.limit(&ip, CREATE_POST, 60_000).await.unwrap();
        }
        assert_eq!(limiter.len(), 10);
    }
}
