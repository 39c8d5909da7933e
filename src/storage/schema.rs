use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

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
    /// `":memory:"` opens a private in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another chanwatch process
    /// has the database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5 seconds for locks held by concurrent
        // bookmark updates before returning SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Boards known per site; `active` boards are the ones the user follows
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS boards (
                site TEXT NOT NULL,
                code TEXT NOT NULL,
                name TEXT,
                active INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (site, code)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Thread rows; bookmarks and extra info hang off these
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id INTEGER PRIMARY KEY,
                site TEXT NOT NULL,
                board TEXT NOT NULL,
                op_no INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(site, board, op_no)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookmarks (
                thread_id INTEGER PRIMARY KEY REFERENCES threads(id) ON DELETE CASCADE,
                title TEXT,
                thumbnail_url TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_filter_watch INTEGER NOT NULL DEFAULT 0,
                is_dead INTEGER NOT NULL DEFAULT 0,
                last_viewed_post INTEGER,
                last_loaded_post INTEGER,
                seen_posts_count INTEGER NOT NULL DEFAULT 0,
                total_posts_count INTEGER NOT NULL DEFAULT 0,
                created_on INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS thread_extra_info (
                thread_id INTEGER PRIMARY KEY REFERENCES threads(id) ON DELETE CASCADE,
                bump_limit_reached INTEGER,
                unique_posters INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // `targets` and `scope` are JSON documents
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watch_filters (
                id INTEGER PRIMARY KEY,
                targets TEXT NOT NULL,
                pattern TEXT NOT NULL,
                scope TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                watch INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_boards_active ON boards(active)")
            .execute(&mut *tx)
            .await?;

        // Key-value store for runtime settings (watch.enabled, watch.in_background, ...)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
