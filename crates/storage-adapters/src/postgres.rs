//! # PostgreSQL board repository
//!
//! Implements [`BoardRepository`] on top of two tables, `categories` and
//! `posts` (see `migrations/`).
//!
//! ## Numbering
//!
//! Each category row carries `post_count`, the number the next post will
//! receive. A write runs as one transaction:
//!
//! 1. `SELECT post_count … FOR UPDATE` locks the category row. No row means
//!    the category does not exist.
//! 2. For replies, the parent is looked up. It must be a committed thread
//!    root in the same category.
//! 3. The post is inserted under the locked counter value.
//! 4. The counter is advanced and the transaction commits.
//!
//! Writers to one category queue on that single row lock; writers to other
//! categories never touch it. Deletes take the same category lock first, so
//! every transaction that mutates a category acquires locks in the same order.
//!
//! Dropping an uncommitted [`sqlx::Transaction`] rolls it back, so a write
//! future cancelled by a timeout leaves neither a post nor a counter advance.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    BoardRepository, Category, CategoryView, DomainError, DomainResult, NewCategory, NewPost,
    Parent, Post, PostNumber, ThreadView,
};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

/// SQLSTATE for foreign-key violations.
const FK_VIOLATION: &str = "23503";
/// SQLSTATE for unique-constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

const POST_COLUMNS: &str = "num, cat, subject, parent, content, username, email, ip, created_at";

#[derive(sqlx::FromRow)]
struct CategoryRow {
    tag: String,
    name: String,
    description: String,
    post_count: i64,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            tag: row.tag,
            name: row.name,
            description: row.description,
            post_count: row.post_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    num: i64,
    cat: String,
    subject: String,
    parent: i64,
    content: String,
    username: String,
    email: String,
    ip: String,
    created_at: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            num: row.num,
            cat: row.cat,
            subject: row.subject,
            parent: Parent::from(row.parent),
            content: row.content,
            username: row.username,
            email: row.email,
            ip: row.ip,
            created_at: row.created_at,
        }
    }
}

/// Logs a driver error in full and converts it to an opaque internal error.
fn internal(context: &'static str) -> impl FnOnce(sqlx::Error) -> DomainError {
    move |err| {
        tracing::error!(error = %err, "{context}");
        DomainError::Internal(format!("{context}: {err}"))
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

pub struct PgBoardRepository {
    pool: PgPool,
}

impl PgBoardRepository {
    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> DomainResult<Self> {
        let options = PgConnectOptions::from_str(url).map_err(internal("invalid postgres url"))?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(internal("postgres connection failed"))?;
        tracing::info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies pending schema migrations.
    pub async fn migrate(&self) -> DomainResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|err| {
            tracing::error!(error = %err, "schema migration failed");
            DomainError::Internal(format!("schema migration failed: {err}"))
        })
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Opens a read-only transaction whose statements share one snapshot.
    async fn begin_snapshot(&self) -> DomainResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(internal("failed to begin read transaction"))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(internal("failed to set read isolation"))?;
        Ok(tx)
    }

    /// Locks the category row and returns its counter, or `None` when the
    /// category does not exist.
    async fn lock_category(tx: &mut Transaction<'static, Postgres>, tag: &str) -> DomainResult<Option<PostNumber>> {
        sqlx::query_scalar::<_, PostNumber>("SELECT post_count FROM categories WHERE tag = $1 FOR UPDATE")
            .bind(tag)
            .fetch_optional(&mut **tx)
            .await
            .map_err(internal("failed to lock category counter"))
    }

    async fn fetch_category<'e, E>(executor: E, tag: &str) -> DomainResult<Category>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, CategoryRow>(
            "SELECT tag, name, description, post_count FROM categories WHERE tag = $1",
        )
        .bind(tag)
        .fetch_optional(executor)
        .await
        .map_err(internal("failed to query a category"))?
        .map(Category::from)
        .ok_or_else(|| DomainError::NotFound(format!("category {tag} does not exist")))
    }
}

#[async_trait]
impl BoardRepository for PgBoardRepository {
    #[tracing::instrument(skip(self, category), fields(tag = %category.tag))]
    async fn create_category(&self, category: NewCategory) -> DomainResult<Category> {
        let row = sqlx::query_as::<_, CategoryRow>(
            "INSERT INTO categories (tag, name, description, post_count) VALUES ($1, $2, $3, 1) \
             RETURNING tag, name, description, post_count",
        )
        .bind(&category.tag)
        .bind(&category.name)
        .bind(&category.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if sqlstate(&err).as_deref() == Some(UNIQUE_VIOLATION) {
                DomainError::Conflict(format!("category {} already exists", category.tag))
            } else {
                internal("failed to insert category")(err)
            }
        })?;
        tracing::info!("category created");
        Ok(row.into())
    }

    async fn get_category(&self, tag: &str) -> DomainResult<Category> {
        Self::fetch_category(&self.pool, tag).await
    }

    async fn list_categories(&self) -> DomainResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT tag, name, description, post_count FROM categories ORDER BY tag ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(internal("failed to query categories"))?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn get_category_view(&self, tag: &str) -> DomainResult<CategoryView> {
        let mut tx = self.begin_snapshot().await?;
        let category = Self::fetch_category(&mut *tx, tag).await?;

        let threads = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE cat = $1 AND parent = 0 ORDER BY num ASC"
        ))
        .bind(tag)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal("failed to query category threads"))?;

        tx.commit().await.map_err(internal("failed to finish category read"))?;
        Ok(CategoryView {
            category,
            threads: threads.into_iter().map(Post::from).collect(),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn remove_category(&self, tag: &str) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(internal("failed to obtain tx for category removal"))?;

        if Self::lock_category(&mut tx, tag).await?.is_none() {
            return Ok(0);
        }

        let posts = sqlx::query("DELETE FROM posts WHERE cat = $1")
            .bind(tag)
            .execute(&mut *tx)
            .await
            .map_err(internal("failed to remove category posts"))?
            .rows_affected();

        let categories = sqlx::query("DELETE FROM categories WHERE tag = $1")
            .bind(tag)
            .execute(&mut *tx)
            .await
            .map_err(internal("failed to remove category"))?
            .rows_affected();

        tx.commit().await.map_err(internal("failed to commit category removal"))?;
        tracing::info!(posts, "category removed");
        Ok(posts + categories)
    }

    #[tracing::instrument(skip(self, post), fields(cat = %post.cat, parent = post.parent.as_raw()))]
    async fn write_post(&self, post: NewPost) -> DomainResult<PostNumber> {
        let mut tx = self.pool.begin().await.map_err(internal("failed to obtain tx for post write"))?;

        let Some(num) = Self::lock_category(&mut tx, &post.cat).await? else {
            return Err(DomainError::missing_category_or_post());
        };

        if let Parent::ReplyTo(parent) = post.parent {
            // Only committed posts are visible here; any sibling writer that
            // could be inserting this parent is queued behind our row lock.
            let grandparent: Option<i64> =
                sqlx::query_scalar("SELECT parent FROM posts WHERE cat = $1 AND num = $2")
                    .bind(&post.cat)
                    .bind(parent)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(internal("failed to look up parent post"))?;
            if grandparent != Some(0) {
                return Err(DomainError::missing_category_or_post());
            }
        }

        sqlx::query(
            "INSERT INTO posts (cat, num, parent, subject, content, username, email, ip) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&post.cat)
        .bind(num)
        .bind(post.parent.as_raw())
        .bind(&post.subject)
        .bind(&post.content)
        .bind(&post.username)
        .bind(&post.email)
        .bind(&post.ip)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if sqlstate(&err).as_deref() == Some(FK_VIOLATION) {
                DomainError::missing_category_or_post()
            } else {
                internal("failed to execute post write")(err)
            }
        })?;

        sqlx::query("UPDATE categories SET post_count = post_count + 1 WHERE tag = $1")
            .bind(&post.cat)
            .execute(&mut *tx)
            .await
            .map_err(internal("failed to advance category counter"))?;

        tx.commit().await.map_err(internal("failed to commit post write"))?;
        tracing::debug!(num, "post written");
        Ok(num)
    }

    async fn get_post(&self, tag: &str, num: PostNumber) -> DomainResult<Post> {
        sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE cat = $1 AND num = $2"
        ))
        .bind(tag)
        .bind(num)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal("failed to query a post by number"))?
        .map(Post::from)
        .ok_or_else(DomainError::missing_category_or_post)
    }

    async fn get_thread_view(&self, tag: &str, root: PostNumber) -> DomainResult<ThreadView> {
        let mut tx = self.begin_snapshot().await?;
        let category = Self::fetch_category(&mut *tx, tag).await?;

        let posts: Vec<Post> = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE cat = $1 AND (num = $2 OR parent = $2) ORDER BY num ASC"
        ))
        .bind(tag)
        .bind(root)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal("failed to query thread posts"))?
        .into_iter()
        .map(Post::from)
        .collect();

        tx.commit().await.map_err(internal("failed to finish thread read"))?;

        // Replies always number above their root, so the root leads.
        match posts.first() {
            Some(op) if op.num == root && !op.is_reply() => Ok(ThreadView { category, posts }),
            _ => Err(DomainError::missing_category_or_post()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn remove_post(&self, tag: &str, num: PostNumber) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(internal("failed to obtain tx for post removal"))?;

        if Self::lock_category(&mut tx, tag).await?.is_none() {
            return Ok(0);
        }

        let parent: Option<i64> = sqlx::query_scalar("SELECT parent FROM posts WHERE cat = $1 AND num = $2")
            .bind(tag)
            .bind(num)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("failed to look up post for removal"))?;
        let Some(parent) = parent else {
            return Ok(0);
        };

        let mut removed = 0;
        if Parent::from(parent).is_root() {
            removed += sqlx::query("DELETE FROM posts WHERE cat = $1 AND parent = $2")
                .bind(tag)
                .bind(num)
                .execute(&mut *tx)
                .await
                .map_err(internal("failed to remove thread replies"))?
                .rows_affected();
        }

        removed += sqlx::query("DELETE FROM posts WHERE cat = $1 AND num = $2")
            .bind(tag)
            .bind(num)
            .execute(&mut *tx)
            .await
            .map_err(internal("failed to remove post"))?
            .rows_affected();

        tx.commit().await.map_err(internal("failed to commit post removal"))?;
        tracing::info!(removed, "post removed");
        Ok(removed)
    }
}
