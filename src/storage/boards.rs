use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::StoredBoard;

impl Database {
    // ========================================================================
    // Board Operations
    // ========================================================================

    /// Insert boards, updating the display name of boards that already exist.
    ///
    /// The `active` flag of existing boards is preserved; use
    /// [`set_boards_active`](Self::set_boards_active) to change it.
    pub async fn upsert_boards(&self, boards: &[StoredBoard]) -> Result<()> {
        if boards.is_empty() {
            return Ok(());
        }

        const BATCH_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;

        for chunk in boards.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT INTO boards (site, code, name, active) ");

            builder.push_values(chunk, |mut b, board| {
                b.push_bind(&board.site)
                    .push_bind(&board.code)
                    .push_bind(&board.name)
                    .push_bind(board.active);
            });

            builder.push(" ON CONFLICT(site, code) DO UPDATE SET name = excluded.name");

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All boards, ordered by site then code
    pub async fn load_boards(&self) -> Result<Vec<StoredBoard>> {
        let rows: Vec<(String, String, Option<String>, bool)> =
            sqlx::query_as("SELECT site, code, name, active FROM boards ORDER BY site, code")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(site, code, name, active)| StoredBoard {
                site,
                code,
                name,
                active,
            })
            .collect())
    }

    /// Activate or deactivate boards of one site.
    ///
    /// Returns the number of boards whose row was touched.
    pub async fn set_boards_active(&self, site: &str, codes: &[String], active: bool) -> Result<u64> {
        if codes.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE boards SET active = ");
        builder.push_bind(active);
        builder.push(" WHERE site = ");
        builder.push_bind(site);
        builder.push(" AND code IN (");
        let mut separated = builder.separated(", ");
        for code in codes {
            separated.push_bind(code);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn board(code: &str, active: bool) -> StoredBoard {
        StoredBoard {
            site: "4chan".to_string(),
            code: code.to_string(),
            name: Some(format!("/{code}/")),
            active,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_load_boards() {
        let db = test_db().await;
        db.upsert_boards(&[board("g", false), board("ck", true)])
            .await
            .unwrap();

        let boards = db.load_boards().await.unwrap();
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].code, "ck");
        assert!(boards[0].active);
        assert_eq!(boards[1].code, "g");
        assert!(!boards[1].active);
    }

    #[tokio::test]
    async fn test_upsert_preserves_active_flag() {
        let db = test_db().await;
        db.upsert_boards(&[board("ck", true)]).await.unwrap();

        let mut renamed = board("ck", false);
        renamed.name = Some("Food & Cooking".to_string());
        db.upsert_boards(&[renamed]).await.unwrap();

        let boards = db.load_boards().await.unwrap();
        assert!(boards[0].active);
        assert_eq!(boards[0].name.as_deref(), Some("Food & Cooking"));
    }

    #[tokio::test]
    async fn test_set_boards_active() {
        let db = test_db().await;
        db.upsert_boards(&[board("g", false), board("ck", false), board("a", false)])
            .await
            .unwrap();

        let touched = db
            .set_boards_active("4chan", &["g".to_string(), "ck".to_string()], true)
            .await
            .unwrap();
        assert_eq!(touched, 2);

        let active: Vec<String> = db
            .load_boards()
            .await
            .unwrap()
            .into_iter()
            .filter(|b| b.active)
            .map(|b| b.code)
            .collect();
        assert_eq!(active, vec!["ck".to_string(), "g".to_string()]);

        assert_eq!(db.set_boards_active("4chan", &[], true).await.unwrap(), 0);
    }
}
