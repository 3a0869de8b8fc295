//! # DomainError
//!
//! Centralized error type for the board core. Only `NotFound`, `Conflict`
//! and `RateLimited` carry user-facing text; `Internal` details are logged
//! where they occur and must not be shown to end users.

use thiserror::Error;

/// The primary error type for all core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Category or post absent, or a reply referencing a parent that does
    /// not exist in the target category.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists (e.g. duplicate category tag)
    #[error("conflict: {0}")]
    Conflict(String),

    /// The identifier is throttled for the requested resource
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Infrastructure failure (e.g. DB down, lock wait timeout, Redis error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// The message shown for every write that references an unknown
    /// category or parent post.
    pub fn missing_category_or_post() -> Self {
        DomainError::NotFound("that category or post does not exist".to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::NotFound(_))
    }

    /// Text safe to return to an end user.
    pub fn public_message(&self) -> String {
        match self {
            DomainError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// A specialized Result type for core operations.
pub type DomainResult<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_detail_is_not_public() {
        let err = DomainError::Internal("connection refused (os error 111)".into());
        assert_eq!(err.public_message(), "internal server error");
        assert!(err.to_string().contains("os error 111"));
    }

    #[test]
    fn test_missing_category_or_post() {
        let err = DomainError::missing_category_or_post();
        assert!(err.is_not_found());
        assert_eq!(err.public_message(), "not found: that category or post does not exist");
    }
}
