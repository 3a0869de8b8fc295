//! Shared fixtures and the repository contract suite.
//!
//! Every `BoardRepository` adapter must pass the functions in [`contracts`];
//! the test targets run them against the memory adapter always and against
//! Postgres when a database is available.

pub mod fixtures {
    use std::sync::atomic::{AtomicU64, Ordering};

    use domains::{NewCategory, NewPost, Parent};

    static NEXT: AtomicU64 = AtomicU64::new(0);

    /// A tag no other test in this process (or an earlier run against the
    /// same database) has used.
    pub fn unique_tag(prefix: &str) -> String {
        let seq = NEXT.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{prefix}-{nanos:x}-{seq}")
    }

    pub fn category(tag: &str) -> NewCategory {
        NewCategory {
            tag: tag.to_string(),
            name: format!("/{tag}/"),
            description: "test category".to_string(),
        }
    }

    pub fn post(tag: &str, parent: Parent) -> NewPost {
        NewPost {
            cat: tag.to_string(),
            parent,
            subject: "subject".to_string(),
            content: "hello board".to_string(),
            username: "anon".to_string(),
            email: "anon@example.com".to_string(),
            ip: "192.0.2.1".to_string(),
        }
    }

    pub fn thread(tag: &str) -> NewPost {
        post(tag, Parent::Root)
    }

    pub fn reply(tag: &str, parent: i64) -> NewPost {
        post(tag, Parent::ReplyTo(parent))
    }
}

pub mod contracts {
    use std::sync::Arc;

    use domains::{BoardRepository, DomainError, Parent};

    use crate::fixtures::{category, reply, thread, unique_tag};

    /// N concurrent root writes yield exactly `k..k+N` with `k` the counter
    /// before the batch.
    pub async fn concurrent_writes_are_contiguous(repo: Arc<dyn BoardRepository>, writers: usize) {
        let tag = unique_tag("seq");
        repo.create_category(category(&tag)).await.unwrap();
        repo.write_post(thread(&tag)).await.unwrap();
        let start = repo.get_category(&tag).await.unwrap().post_count;

        let mut tasks = Vec::with_capacity(writers);
        for _ in 0..writers {
            let repo = Arc::clone(&repo);
            let tag = tag.clone();
            tasks.push(tokio::spawn(async move { repo.write_post(thread(&tag)).await }));
        }
        let mut nums = Vec::with_capacity(writers);
        for task in tasks {
            nums.push(task.await.unwrap().unwrap());
        }
        nums.sort_unstable();

        let expected: Vec<i64> = (start..start + writers as i64).collect();
        assert_eq!(nums, expected);
        assert_eq!(repo.get_category(&tag).await.unwrap().post_count, start + writers as i64);
    }

    /// Writers to different categories do not affect each other's numbering.
    pub async fn categories_number_independently(repo: Arc<dyn BoardRepository>) {
        let a = unique_tag("ind-a");
        let b = unique_tag("ind-b");
        repo.create_category(category(&a)).await.unwrap();
        repo.create_category(category(&b)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let repo = Arc::clone(&repo);
            let tag = if i % 2 == 0 { a.clone() } else { b.clone() };
            tasks.push(tokio::spawn(async move { repo.write_post(thread(&tag)).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(repo.get_category(&a).await.unwrap().post_count, 11);
        assert_eq!(repo.get_category(&b).await.unwrap().post_count, 11);
    }

    pub async fn missing_category_is_not_found(repo: Arc<dyn BoardRepository>) {
        let tag = unique_tag("ghost");
        let err = repo.write_post(thread(&tag)).await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err:?}");
        assert!(repo.get_category(&tag).await.unwrap_err().is_not_found());
        assert_eq!(repo.remove_post(&tag, 1).await.unwrap(), 0);
    }

    /// A reply to a missing parent fails without consuming a number; the
    /// same reply succeeds once that root exists.
    pub async fn reply_requires_existing_root(repo: Arc<dyn BoardRepository>) {
        let tag = unique_tag("reply");
        repo.create_category(category(&tag)).await.unwrap();

        assert!(repo.write_post(reply(&tag, 1)).await.unwrap_err().is_not_found());
        assert_eq!(repo.get_category(&tag).await.unwrap().post_count, 1);
        assert!(repo.get_post(&tag, 1).await.unwrap_err().is_not_found());

        assert_eq!(repo.write_post(thread(&tag)).await.unwrap(), 1);
        assert_eq!(repo.write_post(reply(&tag, 1)).await.unwrap(), 2);

        // Replies cannot be replied to.
        assert!(repo.write_post(reply(&tag, 2)).await.unwrap_err().is_not_found());
        assert_eq!(repo.get_category(&tag).await.unwrap().post_count, 3);
    }

    pub async fn reply_to_other_category_is_not_found(repo: Arc<dyn BoardRepository>) {
        let home = unique_tag("home");
        let away = unique_tag("away");
        repo.create_category(category(&home)).await.unwrap();
        repo.create_category(category(&away)).await.unwrap();
        repo.write_post(thread(&home)).await.unwrap();

        assert!(repo.write_post(reply(&away, 1)).await.unwrap_err().is_not_found());
        assert_eq!(repo.get_category(&away).await.unwrap().post_count, 1);
    }

    /// Deleting a root removes exactly its replies; a reply goes alone.
    pub async fn thread_removal_cascades_to_its_replies_only(repo: Arc<dyn BoardRepository>) {
        let tag = unique_tag("cascade");
        let other = unique_tag("bystander");
        repo.create_category(category(&tag)).await.unwrap();
        repo.create_category(category(&other)).await.unwrap();

        let first = repo.write_post(thread(&tag)).await.unwrap();
        let second = repo.write_post(thread(&tag)).await.unwrap();
        let r1 = repo.write_post(reply(&tag, first)).await.unwrap();
        let r2 = repo.write_post(reply(&tag, second)).await.unwrap();
        let r3 = repo.write_post(reply(&tag, first)).await.unwrap();
        let foreign = repo.write_post(thread(&other)).await.unwrap();
        repo.write_post(reply(&other, foreign)).await.unwrap();

        assert_eq!(repo.remove_post(&tag, r2).await.unwrap(), 1);
        assert_eq!(repo.get_thread_view(&tag, second).await.unwrap().posts.len(), 1);

        assert_eq!(repo.remove_post(&tag, first).await.unwrap(), 3);
        for num in [first, r1, r3] {
            assert!(repo.get_post(&tag, num).await.unwrap_err().is_not_found());
        }
        assert!(repo.get_post(&tag, second).await.is_ok());
        assert_eq!(repo.get_thread_view(&other, foreign).await.unwrap().posts.len(), 2);

        assert_eq!(repo.remove_post(&tag, first).await.unwrap(), 0);
        // Removal never rewinds the counter.
        assert_eq!(repo.get_category(&tag).await.unwrap().post_count, 6);
    }

    pub async fn category_removal_counts_rows(repo: Arc<dyn BoardRepository>) {
        let tag = unique_tag("doomed");
        repo.create_category(category(&tag)).await.unwrap();
        let root = repo.write_post(thread(&tag)).await.unwrap();
        repo.write_post(reply(&tag, root)).await.unwrap();
        repo.write_post(thread(&tag)).await.unwrap();

        assert_eq!(repo.remove_category(&tag).await.unwrap(), 4);
        assert!(repo.get_category(&tag).await.unwrap_err().is_not_found());
        assert!(repo.get_post(&tag, root).await.unwrap_err().is_not_found());
        assert!(repo.write_post(thread(&tag)).await.unwrap_err().is_not_found());
        assert_eq!(repo.remove_category(&tag).await.unwrap(), 0);
    }

    pub async fn duplicate_category_conflicts(repo: Arc<dyn BoardRepository>) {
        let tag = unique_tag("dup");
        let created = repo.create_category(category(&tag)).await.unwrap();
        assert_eq!(created.post_count, 1);
        let err = repo.create_category(category(&tag)).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)), "unexpected error: {err:?}");
        assert!(repo.list_categories().await.unwrap().iter().any(|c| c.tag == tag));
    }

    /// Category views list roots only, ascending; thread views reject a
    /// number that names a reply.
    pub async fn views_are_assembled_in_order(repo: Arc<dyn BoardRepository>) {
        let tag = unique_tag("views");
        repo.create_category(category(&tag)).await.unwrap();
        let a = repo.write_post(thread(&tag)).await.unwrap();
        let ra = repo.write_post(reply(&tag, a)).await.unwrap();
        let b = repo.write_post(thread(&tag)).await.unwrap();

        let view = repo.get_category_view(&tag).await.unwrap();
        assert_eq!(view.category.tag, tag);
        let roots: Vec<i64> = view.threads.iter().map(|p| p.num).collect();
        assert_eq!(roots, vec![a, b]);
        assert!(view.threads.iter().all(|p| p.parent == Parent::Root));

        assert!(repo.get_thread_view(&tag, ra).await.unwrap_err().is_not_found());
        assert!(repo.get_thread_view(&tag, 999).await.unwrap_err().is_not_found());
        assert!(repo.get_category_view(&unique_tag("none")).await.unwrap_err().is_not_found());
    }

    /// Replies racing the removal of their root either land before it and
    /// are removed with it, or fail with `NotFound`. No reply survives its
    /// root.
    pub async fn replies_racing_root_removal_leave_no_orphans(
        repo: Arc<dyn BoardRepository>,
        rounds: usize,
        writers: usize,
    ) {
        let tag = unique_tag("orphan");
        repo.create_category(category(&tag)).await.unwrap();

        for _ in 0..rounds {
            let root = repo.write_post(thread(&tag)).await.unwrap();

            let mut replies = Vec::with_capacity(writers);
            for _ in 0..writers / 2 {
                let repo = Arc::clone(&repo);
                let tag = tag.clone();
                replies.push(tokio::spawn(async move { repo.write_post(reply(&tag, root)).await }));
            }
            let remover = {
                let repo = Arc::clone(&repo);
                let tag = tag.clone();
                tokio::spawn(async move { repo.remove_post(&tag, root).await })
            };
            for _ in writers / 2..writers {
                let repo = Arc::clone(&repo);
                let tag = tag.clone();
                replies.push(tokio::spawn(async move { repo.write_post(reply(&tag, root)).await }));
            }

            let mut landed = Vec::new();
            for task in replies {
                match task.await.unwrap() {
                    Ok(num) => landed.push(num),
                    Err(err) => assert!(err.is_not_found(), "unexpected error: {err:?}"),
                }
            }
            let removed = remover.await.unwrap().unwrap();

            assert_eq!(removed, landed.len() as u64 + 1);
            assert!(repo.get_post(&tag, root).await.unwrap_err().is_not_found());
            for num in landed {
                assert!(repo.get_post(&tag, num).await.unwrap_err().is_not_found());
            }
        }
        assert!(repo.get_category_view(&tag).await.unwrap().threads.is_empty());
    }

    /// Writers racing a category removal either land before it and are
    /// counted in its result, or fail with `NotFound`. Nothing is left.
    pub async fn category_removal_racing_writers_leaves_nothing(repo: Arc<dyn BoardRepository>, writers: usize) {
        let tag = unique_tag("razed");
        repo.create_category(category(&tag)).await.unwrap();

        let mut tasks = Vec::with_capacity(writers);
        for _ in 0..writers / 2 {
            let repo = Arc::clone(&repo);
            let tag = tag.clone();
            tasks.push(tokio::spawn(async move { repo.write_post(thread(&tag)).await }));
        }
        let remover = {
            let repo = Arc::clone(&repo);
            let tag = tag.clone();
            tokio::spawn(async move { repo.remove_category(&tag).await })
        };
        for _ in writers / 2..writers {
            let repo = Arc::clone(&repo);
            let tag = tag.clone();
            tasks.push(tokio::spawn(async move { repo.write_post(thread(&tag)).await }));
        }

        let mut landed = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(num) => landed.push(num),
                Err(err) => assert!(err.is_not_found(), "unexpected error: {err:?}"),
            }
        }
        let removed = remover.await.unwrap().unwrap();

        assert_eq!(removed, landed.len() as u64 + 1);
        assert!(repo.get_category(&tag).await.unwrap_err().is_not_found());
        for num in landed {
            assert!(repo.get_post(&tag, num).await.unwrap_err().is_not_found());
        }
    }
}
