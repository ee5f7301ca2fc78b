use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Locked` if another process has the database
    /// locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StorageError::Migration` if the schema could not be applied.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. A scheduled daemon and a manual sync
        // can touch the database at the same time, so transient contention is
        // expected. Using pragma() ensures all pool connections inherit it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; 5 connections covers peak concurrent
        // readers (fetch loop + status polling).
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                StorageError::Locked
            } else {
                StorageError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All schema changes use `IF NOT EXISTS` for idempotency, so re-running
    /// on an existing database is a no-op. If any step fails the transaction
    /// rolls back, leaving the previous schema intact.
    async fn migrate(&self) -> Result<()> {
        // Enable foreign keys (per-connection setting, outside the transaction)
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                remote_id TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                site_url TEXT,
                last_fetched INTEGER,
                newest_published INTEGER,
                unread_count INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY,
                remote_id TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                parent_id INTEGER REFERENCES folders(id) ON DELETE SET NULL,
                is_tag INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_folders (
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
                PRIMARY KEY (feed_id, folder_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // canonical_url UNIQUE is the storage-level half of the dedup
        // invariant; the reconciler's lookup-before-insert is the other half.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                remote_id TEXT NOT NULL,
                canonical_url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                published INTEGER,
                content TEXT,
                full_content TEXT,
                summary TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL,
                fetched_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles(feed_id)")
            .execute(&mut *tx)
            .await?;
        // Covers the pruner's oldest-first scan over non-starred articles
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_starred_published ON articles(is_starred, published ASC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_changes (
                id INTEGER PRIMARY KEY,
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                action TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                id INTEGER PRIMARY KEY,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                status TEXT NOT NULL,
                articles_fetched INTEGER NOT NULL DEFAULT 0,
                api_calls INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]'
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // One row per calendar day; consumed via conditional UPDATE so the
        // daily limit holds across concurrent processes.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_state (
                day TEXT PRIMARY KEY,
                calls_used INTEGER NOT NULL DEFAULT 0,
                calls_limit INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
