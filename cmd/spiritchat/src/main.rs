//! # spiritchat
//!
//! Operator entry point: applies the schema and manages categories.
//! Backends are chosen at compile time through features.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use configs::Settings;
use domains::{BoardRepository, NewCategory, RateLimiter};
use secrecy::ExposeSecret;
use services::{BoardService, WritePolicy};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "db-postgres")]
use storage_adapters::PgBoardRepository;

#[cfg(feature = "redis")]
use storage_adapters::RedisRateLimiter;

const USAGE: &str = "usage: spiritchat <command>

commands:
  migrate                                   apply pending schema migrations
  create-category <tag> <name> [description]
  remove-category <tag>                     remove a category and all its posts
  remove-post <tag> <num>                   remove a post (threads take their replies)
  list-categories";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Migrate,
    CreateCategory(NewCategory),
    RemoveCategory(String),
    RemovePost(String, i64),
    ListCategories,
}

impl Command {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["migrate"] => Ok(Command::Migrate),
            ["create-category", tag, name, rest @ ..] => Ok(Command::CreateCategory(NewCategory {
                tag: tag.to_string(),
                name: name.to_string(),
                description: rest.join(" "),
            })),
            ["remove-category", tag] => Ok(Command::RemoveCategory(tag.to_string())),
            ["remove-post", tag, num] => {
                let num = num.parse().with_context(|| format!("invalid post number {num:?}"))?;
                Ok(Command::RemovePost(tag.to_string(), num))
            }
            ["list-categories"] => Ok(Command::ListCategories),
            _ => Err(anyhow!("{USAGE}")),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("SPIRITCHAT_LOG_JSON").is_ok_and(|v| v == "1") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(feature = "db-postgres")]
async fn open_repository(settings: &Settings) -> anyhow::Result<Arc<PgBoardRepository>> {
    let repo = PgBoardRepository::connect(
        settings.database.url.expose_secret(),
        settings.database.max_connections,
        Duration::from_millis(settings.database.acquire_timeout_ms),
    )
    .await?;
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "db-postgres"))]
async fn open_repository(_settings: &Settings) -> anyhow::Result<Arc<storage_adapters::MemoryBoardRepository>> {
    tracing::warn!("built without db-postgres; categories live in memory for this process only");
    Ok(Arc::new(storage_adapters::MemoryBoardRepository::new()))
}

#[cfg(feature = "redis")]
fn open_limiter(settings: &Settings) -> anyhow::Result<Arc<dyn RateLimiter>> {
    let limiter = RedisRateLimiter::connect(settings.redis.url.expose_secret(), settings.redis.pool_size)?;
    Ok(Arc::new(limiter))
}

#[cfg(not(feature = "redis"))]
fn open_limiter(_settings: &Settings) -> anyhow::Result<Arc<dyn RateLimiter>> {
    Ok(Arc::new(storage_adapters::MemoryRateLimiter::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    let settings = Settings::load().context("failed to load settings")?;

    let repo = open_repository(&settings).await?;
    let policy = WritePolicy {
        post_cooldown_ms: settings.limits.post_cooldown_ms,
        write_timeout: Duration::from_millis(settings.limits.write_timeout_ms),
    };
    let board = || -> anyhow::Result<BoardService> {
        Ok(BoardService::new(
            Arc::clone(&repo) as Arc<dyn BoardRepository>,
            open_limiter(&settings)?,
            policy,
        ))
    };

    match command {
        Command::Migrate => {
            #[cfg(feature = "db-postgres")]
            repo.migrate().await?;
            tracing::info!("schema is up to date");
        }
        Command::CreateCategory(category) => {
            let created = board()?.create_category(category).await?;
            println!("created /{}/ ({})", created.tag, created.name);
        }
        Command::RemoveCategory(tag) => {
            let removed = board()?.remove_category(&tag).await?;
            if removed == 0 {
                bail!("category {tag} does not exist");
            }
            println!("removed /{tag}/ and {} posts", removed - 1);
        }
        Command::RemovePost(tag, num) => {
            let removed = board()?.remove_post(&tag, num).await?;
            println!("removed {removed} posts");
        }
        Command::ListCategories => {
            for category in board()?.list_categories().await? {
                println!("/{}/\t{}\tnext #{}\t{}", category.tag, category.name, category.post_count, category.description);
            }
        }
    }

    #[cfg(feature = "db-postgres")]
    repo.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_create_category_joins_description() {
        let command = Command::parse(&args(&["create-category", "tech", "Technology", "gadgets", "and", "code"])).unwrap();
        assert_eq!(
            command,
            Command::CreateCategory(NewCategory {
                tag: "tech".into(),
                name: "Technology".into(),
                description: "gadgets and code".into(),
            })
        );
    }

    #[test]
    fn test_parse_remove_post() {
        assert_eq!(
            Command::parse(&args(&["remove-post", "tech", "42"])).unwrap(),
            Command::RemovePost("tech".into(), 42)
        );
        assert!(Command::parse(&args(&["remove-post", "tech", "forty-two"])).is_err());
    }

    #[test]
    fn test_parse_migrate_takes_no_arguments() {
        assert_eq!(Command::parse(&args(&["migrate"])).unwrap(), Command::Migrate);
        assert!(Command::parse(&args(&["migrate", "now"])).is_err());
    }

    #[test]
    fn test_unknown_command_prints_usage() {
        let err = Command::parse(&args(&["frobnicate"])).unwrap_err();
        assert!(err.to_string().starts_with("usage:"));
    }
}
