use anyhow::Result;

use super::schema::Database;
use super::types::QuotaState;

impl Database {
    // ========================================================================
    // Quota State
    // ========================================================================
    //
    // The daily quota is shared between processes (scheduled daemon + manual
    // CLI), so all mutation happens through single conditional statements at
    // the storage layer. No in-process lock can protect this counter.

    /// Ensure today's quota row exists. Idempotent: the first call on a new
    /// day creates the row with zero usage, later calls are no-ops. This is
    /// the daily reset — a new day key means a fresh counter.
    pub async fn ensure_quota_day(&self, day: &str, calls_limit: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO quota_state (day, calls_used, calls_limit) VALUES (?, 0, ?)",
        )
        .bind(day)
        .bind(calls_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically consume `n` quota units for the given day.
    ///
    /// A single conditional UPDATE increments the counter only when the
    /// post-increment value stays within the limit; `rows_affected == 0`
    /// means the budget would be exceeded and nothing changed. This is the
    /// compare-and-swap the quota invariant rests on.
    pub async fn try_consume_quota(&self, day: &str, n: i64) -> Result<Option<QuotaState>> {
        let result = sqlx::query(
            r#"
            UPDATE quota_state
            SET calls_used = calls_used + ?1
            WHERE day = ?2 AND calls_used + ?1 <= calls_limit
        "#,
        )
        .bind(n)
        .bind(day)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(self.quota_state(day).await?)
    }

    /// Current quota row for a day, if it exists.
    pub async fn quota_state(&self, day: &str) -> Result<Option<QuotaState>> {
        let state = sqlx::query_as::<_, QuotaState>(
            "SELECT day, calls_used, calls_limit FROM quota_state WHERE day = ?",
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }
}
