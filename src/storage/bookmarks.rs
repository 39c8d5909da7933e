use anyhow::Result;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{BookmarkRow, ExtraInfoRow};
use crate::model::{BoardDescriptor, ThreadBookmark, ThreadDescriptor, ThreadExtraInfo};

fn descriptor_from_row(site: &str, board: &str, op_no: i64) -> ThreadDescriptor {
    ThreadDescriptor::new(BoardDescriptor::create(site, board), op_no as u64)
}

impl BookmarkRow {
    fn into_bookmark(self) -> ThreadBookmark {
        ThreadBookmark {
            descriptor: descriptor_from_row(&self.site, &self.board, self.op_no),
            title: self.title,
            thumbnail_url: self.thumbnail_url,
            is_active: self.is_active,
            is_filter_watch: self.is_filter_watch,
            is_dead: self.is_dead,
            last_viewed_post: self.last_viewed_post.map(|no| no as u64),
            last_loaded_post: self.last_loaded_post.map(|no| no as u64),
            seen_posts_count: self.seen_posts_count.max(0) as u32,
            total_posts_count: self.total_posts_count.max(0) as u32,
            created_on: DateTime::from_timestamp_millis(self.created_on).unwrap_or_else(Utc::now),
        }
    }
}

impl Database {
    // ========================================================================
    // Bookmark Operations
    // ========================================================================

    /// Load every persisted bookmark, oldest first.
    pub async fn load_bookmarks(&self) -> Result<Vec<ThreadBookmark>> {
        let rows: Vec<BookmarkRow> = sqlx::query_as(
            r#"
            SELECT t.site, t.board, t.op_no,
                   b.title, b.thumbnail_url, b.is_active, b.is_filter_watch, b.is_dead,
                   b.last_viewed_post, b.last_loaded_post,
                   b.seen_posts_count, b.total_posts_count, b.created_on
            FROM bookmarks b
            JOIN threads t ON t.id = b.thread_id
            ORDER BY b.created_on, t.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BookmarkRow::into_bookmark).collect())
    }

    /// Insert or replace bookmarks in a single transaction.
    ///
    /// A bookmark is only written when its thread row already exists (see
    /// [`PersistenceGateway`](super::PersistenceGateway)). Returns the
    /// descriptors that were actually persisted.
    pub async fn upsert_bookmarks(
        &self,
        bookmarks: &[ThreadBookmark],
    ) -> Result<Vec<ThreadDescriptor>> {
        if bookmarks.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut persisted = Vec::with_capacity(bookmarks.len());

        for bookmark in bookmarks {
            let descriptor = &bookmark.descriptor;
            let result = sqlx::query(
                r#"
                INSERT INTO bookmarks (
                    thread_id, title, thumbnail_url, is_active, is_filter_watch, is_dead,
                    last_viewed_post, last_loaded_post, seen_posts_count, total_posts_count,
                    created_on
                )
                SELECT id, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
                FROM threads WHERE site = ? AND board = ? AND op_no = ?
                ON CONFLICT(thread_id) DO UPDATE SET
                    title = excluded.title,
                    thumbnail_url = excluded.thumbnail_url,
                    is_active = excluded.is_active,
                    is_filter_watch = excluded.is_filter_watch,
                    is_dead = excluded.is_dead,
                    last_viewed_post = excluded.last_viewed_post,
                    last_loaded_post = excluded.last_loaded_post,
                    seen_posts_count = excluded.seen_posts_count,
                    total_posts_count = excluded.total_posts_count
            "#,
            )
            .bind(&bookmark.title)
            .bind(&bookmark.thumbnail_url)
            .bind(bookmark.is_active)
            .bind(bookmark.is_filter_watch)
            .bind(bookmark.is_dead)
            .bind(bookmark.last_viewed_post.map(|no| no as i64))
            .bind(bookmark.last_loaded_post.map(|no| no as i64))
            .bind(bookmark.seen_posts_count as i64)
            .bind(bookmark.total_posts_count as i64)
            .bind(bookmark.created_on.timestamp_millis())
            .bind(descriptor.site().name())
            .bind(descriptor.board.code())
            .bind(descriptor.op_no as i64)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                persisted.push(descriptor.clone());
            } else {
                tracing::warn!(thread = %descriptor, "No thread row for bookmark, not persisted");
            }
        }

        tx.commit().await?;
        Ok(persisted)
    }

    /// Delete bookmarks (and their extra info). Returns the number of bookmarks removed.
    pub async fn delete_bookmarks(&self, descriptors: &[ThreadDescriptor]) -> Result<u64> {
        if descriptors.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;

        for descriptor in descriptors {
            let result = sqlx::query(
                r#"
                DELETE FROM bookmarks WHERE thread_id IN (
                    SELECT id FROM threads WHERE site = ? AND board = ? AND op_no = ?
                )
            "#,
            )
            .bind(descriptor.site().name())
            .bind(descriptor.board.code())
            .bind(descriptor.op_no as i64)
            .execute(&mut *tx)
            .await?;
            deleted += result.rows_affected();

            sqlx::query(
                r#"
                DELETE FROM thread_extra_info WHERE thread_id IN (
                    SELECT id FROM threads WHERE site = ? AND board = ? AND op_no = ?
                )
            "#,
            )
            .bind(descriptor.site().name())
            .bind(descriptor.board.code())
            .bind(descriptor.op_no as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(deleted)
    }

    // ========================================================================
    // Thread Extra Info Operations
    // ========================================================================

    pub async fn load_extra_info(&self) -> Result<Vec<(ThreadDescriptor, ThreadExtraInfo)>> {
        let rows: Vec<ExtraInfoRow> = sqlx::query_as(
            r#"
            SELECT t.site, t.board, t.op_no, e.bump_limit_reached, e.unique_posters
            FROM thread_extra_info e
            JOIN threads t ON t.id = e.thread_id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    descriptor_from_row(&row.site, &row.board, row.op_no),
                    ThreadExtraInfo {
                        bump_limit_reached: row.bump_limit_reached,
                        unique_posters: row.unique_posters.map(|n| n.max(0) as u32),
                    },
                )
            })
            .collect())
    }

    /// Store extra info for a thread. Returns `false` when the thread row is missing.
    pub async fn upsert_extra_info(
        &self,
        descriptor: &ThreadDescriptor,
        info: &ThreadExtraInfo,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO thread_extra_info (thread_id, bump_limit_reached, unique_posters)
            SELECT id, ?, ? FROM threads WHERE site = ? AND board = ? AND op_no = ?
            ON CONFLICT(thread_id) DO UPDATE SET
                bump_limit_reached = excluded.bump_limit_reached,
                unique_posters = excluded.unique_posters
        "#,
        )
        .bind(info.bump_limit_reached)
        .bind(info.unique_posters.map(i64::from))
        .bind(descriptor.site().name())
        .bind(descriptor.board.code())
        .bind(descriptor.op_no as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
