//! # storage-adapters
//!
//! Implementations of the `domains` ports.
//!
//! - `postgres` (feature `db-postgres`): category counters behind row locks.
//! - `redis` (feature `redis`): TTL keys for rate limiting.
//! - `memory`: always compiled, used for development and tests.

pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{MemoryBoardRepository, MemoryRateLimiter};

#[cfg(feature = "db-postgres")]
pub use postgres::PgBoardRepository;

#[cfg(feature = "redis")]
pub use self::redis::RedisRateLimiter;
