use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another chanwatch process has locked the database
    #[error("Another instance of chanwatch appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for bookmark queries (joined with `threads`)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookmarkRow {
    pub site: String,
    pub board: String,
    pub op_no: i64,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub is_active: bool,
    pub is_filter_watch: bool,
    pub is_dead: bool,
    pub last_viewed_post: Option<i64>,
    pub last_loaded_post: Option<i64>,
    pub seen_posts_count: i64,
    pub total_posts_count: i64,
    pub created_on: i64,
}

/// Internal row type for extra info queries (joined with `threads`)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ExtraInfoRow {
    pub site: String,
    pub board: String,
    pub op_no: i64,
    pub bump_limit_reached: Option<bool>,
    pub unique_posters: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FilterRow {
    pub id: i64,
    pub targets: String,
    pub pattern: String,
    pub scope: String,
    pub enabled: bool,
    pub watch: bool,
}

// ============================================================================
// Data Structures
// ============================================================================

/// Board as stored in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBoard {
    pub site: String,
    pub code: String,
    pub name: Option<String>,
    pub active: bool,
}
