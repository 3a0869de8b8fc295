//! In-process adapters: no external services required.

mod board;
mod rate_limiter;

pub use board::MemoryBoardRepository;
pub use rate_limiter::MemoryRateLimiter;
