use anyhow::{Context, Result};

use super::schema::Database;
use super::types::FilterRow;
use crate::model::WatchFilter;

impl FilterRow {
    fn into_filter(self) -> Result<WatchFilter> {
        let targets = serde_json::from_str(&self.targets)
            .with_context(|| format!("Invalid targets for filter {}", self.id))?;
        let scope = serde_json::from_str(&self.scope)
            .with_context(|| format!("Invalid scope for filter {}", self.id))?;
        Ok(WatchFilter {
            id: Some(self.id),
            targets,
            pattern: self.pattern,
            scope,
            enabled: self.enabled,
            watch: self.watch,
        })
    }
}

impl Database {
    // ========================================================================
    // Filter Operations
    // ========================================================================

    /// Insert a filter and return its new id.
    pub async fn insert_filter(&self, filter: &WatchFilter) -> Result<i64> {
        let targets = serde_json::to_string(&filter.targets)?;
        let scope = serde_json::to_string(&filter.scope)?;

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO watch_filters (targets, pattern, scope, enabled, watch)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(targets)
        .bind(&filter.pattern)
        .bind(scope)
        .bind(filter.enabled)
        .bind(filter.watch)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Load all filters in insertion order.
    ///
    /// Rows whose JSON columns cannot be decoded are skipped with a warning
    /// rather than failing the whole load.
    pub async fn load_filters(&self) -> Result<Vec<WatchFilter>> {
        let rows: Vec<FilterRow> = sqlx::query_as(
            "SELECT id, targets, pattern, scope, enabled, watch FROM watch_filters ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut filters = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_filter() {
                Ok(filter) => filters.push(filter),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable filter row"),
            }
        }
        Ok(filters)
    }

    /// Returns `true` if the filter existed.
    pub async fn set_filter_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE watch_filters SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `true` if the filter existed.
    pub async fn delete_filter(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM watch_filters WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
