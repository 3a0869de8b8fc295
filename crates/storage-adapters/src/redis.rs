//! Redis-backed [`RateLimiter`].
//!
//! An entry is a plain key with a millisecond TTL; its existence is the
//! limited state, and Redis expires it on its own.

use async_trait::async_trait;
use deadpool_redis::redis;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use domains::{rate_limit_key, DomainError, DomainResult, RateLimiter};

pub struct RedisRateLimiter {
    pool: Pool,
}

impl RedisRateLimiter {
    pub fn connect(url: &str, pool_size: usize) -> DomainResult<Self> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(PoolConfig::new(pool_size));
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|err| {
            tracing::error!(error = %err, "redis pool creation failed");
            DomainError::Internal(format!("redis pool creation failed: {err}"))
        })?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> DomainResult<Connection> {
        self.pool.get().await.map_err(|err| {
            tracing::error!(error = %err, "failed to obtain redis connection");
            DomainError::Internal(format!("failed to obtain redis connection: {err}"))
        })
    }
}

fn redis_failure(context: &'static str) -> impl FnOnce(redis::RedisError) -> DomainError {
    move |err| {
        tracing::error!(error = %err, "{context}");
        DomainError::Internal(format!("{context}: {err}"))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn is_limited(&self, identifier: &str, resource: &str) -> DomainResult<bool> {
        let mut conn = self.connection().await?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(rate_limit_key(identifier, resource))
            .query_async(&mut conn)
            .await
            .map_err(redis_failure("failed to look up rate limit"))?;
        Ok(exists)
    }

    async fn limit(&self, identifier: &str, resource: &str, duration_ms: i64) -> DomainResult<()> {
        if duration_ms <= 0 {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        // Key and TTL are written by one command.
        let _: () = redis::cmd("SET")
            .arg(rate_limit_key(identifier, resource))
            .arg(1)
            .arg("PX")
            .arg(duration_ms)
            .query_async(&mut conn)
            .await
            .map_err(redis_failure("failed to set rate limit"))?;
        Ok(())
    }
}
