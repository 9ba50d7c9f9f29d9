//! # Library Database
//!
//! Opens the SQLite file behind the library cache and brings its schema up
//! to date.
//!
//! File databases run in WAL mode so the playback and download paths can
//! read while a sync writes. An in-memory database is private to one
//! connection, so its pool is pinned to a single connection that is never
//! recycled.
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("/data/shelfsync/library.db")).await?;
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the library lives and how many connections may touch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    /// Wait for a free pooled connection
    pub acquire_timeout: Duration,
    /// Wait for a SQLite write lock held by another connection
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::new("")
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }

    /// Ignored for in-memory databases.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Open the pool and apply pending migrations.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let in_memory = config.is_in_memory();
    info!(database_url = %config.database_url, in_memory, "Opening library database");

    let mut options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .create_if_missing(true)
        .busy_timeout(config.busy_timeout);
    if !in_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let mut pool_options = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
    pool_options = if in_memory {
        pool_options
            .min_connections(1)
            .max_connections(1)
            .max_lifetime(None)
            .idle_timeout(None)
    } else {
        pool_options.max_connections(config.max_connections)
    };

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        warn!(error = %e, "Failed to open library database");
        LibraryError::Database(e)
    })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        warn!(error = %e, "Library migration failed");
        LibraryError::Migration(e.to_string())
    })?;
    sqlx::query("SELECT 1").execute(&pool).await?;

    debug!(connections = pool.size(), "Library database ready");
    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config() {
        let config = DatabaseConfig::new("/data/library.db")
            .max_connections(0)
            .busy_timeout(Duration::from_secs(1));

        assert_eq!(config.database_url, "sqlite:/data/library.db");
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert!(!config.is_in_memory());
    }

    #[test]
    fn test_default_is_in_memory() {
        let config = DatabaseConfig::default();
        assert!(config.is_in_memory());
        assert_eq!(config.max_connections, 1);
    }

    #[tokio::test]
    async fn test_migrations_create_books_table() {
        let pool = create_test_pool().await.unwrap();

        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'books'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 1);
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_single_connection() {
        let pool = create_test_pool().await.unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    sqlx::query("SELECT COUNT(*) FROM books")
                        .fetch_one(&pool)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
