//! # Domain Models
//!
//! These structs represent the core entities of the board.
//! Posts are identified by `(category tag, number)`; numbers come from the
//! per-category counter and are never reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category-scoped post number. The first post in a category is `1`.
pub type PostNumber = i64;

/// A named board (e.g. "tech") owning its own post-numbering sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Unique key, used in URLs.
    pub tag: String,
    pub name: String,
    pub description: String,
    /// The number the next post in this category will receive.
    /// Never decremented, even when posts are removed.
    pub post_count: PostNumber,
}

/// Input for the category-creation operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub tag: String,
    pub name: String,
    pub description: String,
}

/// Whether a post starts a thread or replies to one.
///
/// Stored as a plain integer where `0` means "no parent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Parent {
    Root,
    ReplyTo(PostNumber),
}

impl Parent {
    pub fn is_root(&self) -> bool {
        matches!(self, Parent::Root)
    }

    /// Column value used by the storage layer.
    pub fn as_raw(&self) -> PostNumber {
        match self {
            Parent::Root => 0,
            Parent::ReplyTo(num) => *num,
        }
    }
}

impl From<i64> for Parent {
    fn from(raw: i64) -> Self {
        match raw {
            0 => Parent::Root,
            num => Parent::ReplyTo(num),
        }
    }
}

impl From<Parent> for i64 {
    fn from(parent: Parent) -> Self {
        parent.as_raw()
    }
}

/// A thread root or a reply. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub num: PostNumber,
    pub cat: String,
    pub subject: String,
    pub parent: Parent,
    pub content: String,
    pub username: String,
    pub email: String,
    /// Poster address, kept server-side only.
    #[serde(skip)]
    pub ip: String,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        !self.parent.is_root()
    }
}

/// An incoming post, already sanitized by the request layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub cat: String,
    pub parent: Parent,
    pub subject: String,
    pub content: String,
    pub username: String,
    pub email: String,
    pub ip: String,
}

/// A thread root followed by its replies, ascending by number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadView {
    pub category: Category,
    pub posts: Vec<Post>,
}

/// A category and its thread roots, ascending by number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryView {
    pub category: Category,
    pub threads: Vec<Post>,
}
