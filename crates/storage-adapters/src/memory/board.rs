//! In-process [`BoardRepository`] for development and tests.
//!
//! Every category owns one `tokio::sync::Mutex` that plays the part of the
//! category row lock: allocation, inserts and cascades for a category all
//! run under it, and nothing awaits while the state is half-updated.
//! Categories never share a lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{
    BoardRepository, Category, CategoryView, DomainError, DomainResult, NewCategory, NewPost,
    Parent, Post, PostNumber, ThreadView,
};
use tokio::sync::Mutex;

struct CategoryState {
    category: Category,
    posts: BTreeMap<PostNumber, Post>,
    /// Set once the category has been removed, for writers that grabbed the
    /// handle before removal and acquired the lock after it.
    removed: bool,
}

type CategoryHandle = Arc<Mutex<CategoryState>>;

#[derive(Default)]
pub struct MemoryBoardRepository {
    categories: DashMap<String, CategoryHandle>,
}

impl MemoryBoardRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // The dashmap guard is dropped before the caller awaits the mutex.
    fn handle(&self, tag: &str) -> Option<CategoryHandle> {
        self.categories.get(tag).map(|entry| Arc::clone(entry.value()))
    }

    fn category_not_found(tag: &str) -> DomainError {
        DomainError::NotFound(format!("category {tag} does not exist"))
    }
}

#[async_trait]
impl BoardRepository for MemoryBoardRepository {
    async fn create_category(&self, category: NewCategory) -> DomainResult<Category> {
        match self.categories.entry(category.tag.clone()) {
            Entry::Occupied(_) => Err(DomainError::Conflict(format!(
                "category {} already exists",
                category.tag
            ))),
            Entry::Vacant(slot) => {
                let created = Category {
                    tag: category.tag,
                    name: category.name,
                    description: category.description,
                    post_count: 1,
                };
                slot.insert(Arc::new(Mutex::new(CategoryState {
                    category: created.clone(),
                    posts: BTreeMap::new(),
                    removed: false,
                })));
                tracing::info!(tag = %created.tag, "category created");
                Ok(created)
            }
        }
    }

    async fn get_category(&self, tag: &str) -> DomainResult<Category> {
        let handle = self.handle(tag).ok_or_else(|| Self::category_not_found(tag))?;
        let state = handle.lock().await;
        if state.removed {
            return Err(Self::category_not_found(tag));
        }
        Ok(state.category.clone())
    }

    async fn list_categories(&self) -> DomainResult<Vec<Category>> {
        let handles: Vec<CategoryHandle> = self
            .categories
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut categories = Vec::with_capacity(handles.len());
        for handle in handles {
            let state = handle.lock().await;
            if !state.removed {
                categories.push(state.category.clone());
            }
        }
        categories.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(categories)
    }

    async fn get_category_view(&self, tag: &str) -> DomainResult<CategoryView> {
        let handle = self.handle(tag).ok_or_else(|| Self::category_not_found(tag))?;
        let state = handle.lock().await;
        if state.removed {
            return Err(Self::category_not_found(tag));
        }
        Ok(CategoryView {
            category: state.category.clone(),
            threads: state.posts.values().filter(|p| !p.is_reply()).cloned().collect(),
        })
    }

    async fn remove_category(&self, tag: &str) -> DomainResult<u64> {
        let Some((_, handle)) = self.categories.remove(tag) else {
            return Ok(0);
        };
        let mut state = handle.lock().await;
        if state.removed {
            return Ok(0);
        }
        let posts = state.posts.len() as u64;
        state.posts.clear();
        state.removed = true;
        tracing::info!(tag, posts, "category removed");
        Ok(posts + 1)
    }

    async fn write_post(&self, post: NewPost) -> DomainResult<PostNumber> {
        let handle = self
            .handle(&post.cat)
            .ok_or_else(DomainError::missing_category_or_post)?;
        let mut state = handle.lock().await;
        if state.removed {
            return Err(DomainError::missing_category_or_post());
        }

        if let Parent::ReplyTo(parent) = post.parent {
            match state.posts.get(&parent) {
                Some(op) if !op.is_reply() => {}
                _ => return Err(DomainError::missing_category_or_post()),
            }
        }

        let num = state.category.post_count;
        state.posts.insert(
            num,
            Post {
                num,
                cat: post.cat,
                subject: post.subject,
                parent: post.parent,
                content: post.content,
                username: post.username,
                email: post.email,
                ip: post.ip,
                created_at: Utc::now(),
            },
        );
        state.category.post_count += 1;
        Ok(num)
    }

    async fn get_post(&self, tag: &str, num: PostNumber) -> DomainResult<Post> {
        let handle = self.handle(tag).ok_or_else(DomainError::missing_category_or_post)?;
        let state = handle.lock().await;
        if state.removed {
            return Err(DomainError::missing_category_or_post());
        }
        state
            .posts
            .get(&num)
            .cloned()
            .ok_or_else(DomainError::missing_category_or_post)
    }

    async fn get_thread_view(&self, tag: &str, root: PostNumber) -> DomainResult<ThreadView> {
        let handle = self.handle(tag).ok_or_else(|| Self::category_not_found(tag))?;
        let state = handle.lock().await;
        if state.removed {
            return Err(Self::category_not_found(tag));
        }

        let op = match state.posts.get(&root) {
            Some(op) if !op.is_reply() => op.clone(),
            _ => return Err(DomainError::missing_category_or_post()),
        };
        let mut posts = vec![op];
        posts.extend(
            state
                .posts
                .range(root + 1..)
                .map(|(_, p)| p)
                .filter(|p| p.parent == Parent::ReplyTo(root))
                .cloned(),
        );
        Ok(ThreadView {
            category: state.category.clone(),
            posts,
        })
    }

    async fn remove_post(&self, tag: &str, num: PostNumber) -> DomainResult<u64> {
        let Some(handle) = self.handle(tag) else {
            return Ok(0);
        };
        let mut state = handle.lock().await;
        // Decided on the row as it stands before anything is removed.
        let is_root = match state.posts.get(&num) {
            Some(target) => !target.is_reply(),
            None => return Ok(0),
        };

        let mut removed = 0;
        if is_root {
            let before = state.posts.len();
            state.posts.retain(|_, p| p.parent != Parent::ReplyTo(num));
            removed += (before - state.posts.len()) as u64;
        }
        if state.posts.remove(&num).is_some() {
            removed += 1;
        }
        tracing::info!(tag, num, removed, "post removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_post(cat: &str, parent: Parent) -> NewPost {
        NewPost {
            cat: cat.into(),
            parent,
            subject: "subject".into(),
            content: "content".into(),
            username: "anon".into(),
            email: String::new(),
            ip: "127.0.0.1".into(),
        }
    }

    async fn repo_with(tags: &[&str]) -> MemoryBoardRepository {
        let repo = MemoryBoardRepository::new();
        for tag in tags {
            repo.create_category(NewCategory {
                tag: tag.to_string(),
                name: tag.to_uppercase(),
                description: String::new(),
            })
            .await
            .unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn test_numbers_are_scoped_per_category() {
        let repo = repo_with(&["a", "b"]).await;
        assert_eq!(repo.write_post(new_post("a", Parent::Root)).await.unwrap(), 1);
        assert_eq!(repo.write_post(new_post("a", Parent::Root)).await.unwrap(), 2);
        assert_eq!(repo.write_post(new_post("b", Parent::Root)).await.unwrap(), 1);
        assert_eq!(repo.get_category("a").await.unwrap().post_count, 3);
    }

    #[tokio::test]
    async fn test_concurrent_writers_get_contiguous_numbers() {
        let repo = Arc::new(repo_with(&["a"]).await);
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let repo = Arc::clone(&repo);
            tasks.push(tokio::spawn(async move { repo.write_post(new_post("a", Parent::Root)).await }));
        }
        let mut nums = Vec::new();
        for task in tasks {
            nums.push(task.await.unwrap().unwrap());
        }
        nums.sort_unstable();
        assert_eq!(nums, (1..=64).collect::<Vec<_>>());
        assert_eq!(repo.get_category("a").await.unwrap().post_count, 65);
    }

    #[tokio::test]
    async fn test_reply_to_reply_is_rejected() {
        let repo = repo_with(&["a"]).await;
        repo.write_post(new_post("a", Parent::Root)).await.unwrap();
        repo.write_post(new_post("a", Parent::ReplyTo(1))).await.unwrap();
        let err = repo.write_post(new_post("a", Parent::ReplyTo(2))).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(repo.get_category("a").await.unwrap().post_count, 3);
    }

    #[tokio::test]
    async fn test_reply_across_categories_is_rejected() {
        let repo = repo_with(&["a", "b"]).await;
        repo.write_post(new_post("a", Parent::Root)).await.unwrap();
        let err = repo.write_post(new_post("b", Parent::ReplyTo(1))).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_removed_category_rejects_stale_handle() {
        let repo = repo_with(&["a"]).await;
        let handle = repo.handle("a").unwrap();
        assert_eq!(repo.remove_category("a").await.unwrap(), 1);
        assert!(handle.lock().await.removed);
        assert!(repo.write_post(new_post("a", Parent::Root)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_get_post_honours_removed_flag() {
        let repo = repo_with(&["a"]).await;
        repo.write_post(new_post("a", Parent::Root)).await.unwrap();
        let handle = repo.handle("a").unwrap();
        handle.lock().await.removed = true;
        assert!(repo.get_post("a", 1).await.unwrap_err().is_not_found());
    }
}
