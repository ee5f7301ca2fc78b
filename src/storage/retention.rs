use anyhow::Result;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Retention Pruning
    // ========================================================================

    /// Delete the oldest non-starred articles until the total stored count
    /// is back at `limit`. Returns the number of rows deleted.
    ///
    /// Starred articles are never deleted; if they alone exceed the limit
    /// the count stays above it. Articles without a published timestamp
    /// sort oldest, then fetched_at and id break ties so repeated runs are
    /// deterministic.
    pub async fn prune_articles(&self, limit: i64) -> Result<u64> {
        let total = self.count_articles().await?;
        let overage = total - limit;
        if overage <= 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM articles
            WHERE id IN (
                SELECT id FROM articles
                WHERE is_starred = 0
                ORDER BY (published IS NULL) DESC, published ASC, fetched_at ASC, id ASC
                LIMIT ?
            )
        "#,
        )
        .bind(overage)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
