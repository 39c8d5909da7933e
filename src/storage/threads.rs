use anyhow::Result;
use async_trait::async_trait;

use super::schema::Database;
use crate::model::ThreadDescriptor;

/// Storage operations the watchers need besides the registries.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Make sure a row exists for `thread`.
    ///
    /// Idempotent: an existing row is left untouched. Returns `true` once the
    /// row is confirmed to exist, `false` if it could not be found afterwards.
    async fn create_empty_thread_if_not_exists(&self, thread: &ThreadDescriptor) -> Result<bool>;
}

impl Database {
    // ========================================================================
    // Thread Operations
    // ========================================================================

    /// Database id of the thread row, if one exists.
    pub async fn thread_id(&self, thread: &ThreadDescriptor) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM threads WHERE site = ? AND board = ? AND op_no = ?")
                .bind(thread.site().name())
                .bind(thread.board.code())
                .bind(thread.op_no as i64)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }
}

#[async_trait]
impl PersistenceGateway for Database {
    async fn create_empty_thread_if_not_exists(&self, thread: &ThreadDescriptor) -> Result<bool> {
        sqlx::query("INSERT OR IGNORE INTO threads (site, board, op_no) VALUES (?, ?, ?)")
            .bind(thread.site().name())
            .bind(thread.board.code())
            .bind(thread.op_no as i64)
            .execute(&self.pool)
            .await?;

        Ok(self.thread_id(thread).await?.is_some())
    }
}
