//! # services
//!
//! Orchestration over the `domains` ports: rate-limit gating and whole-unit
//! deadlines for writes.

pub mod board_service;
pub mod rate_limit_guard;

pub use board_service::{with_deadline, BoardService, WritePolicy};
pub use rate_limit_guard::RateLimitGuard;
