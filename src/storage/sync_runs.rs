use anyhow::Result;

use super::schema::Database;
use super::types::{StorageError, SyncRun, SyncStatus};

/// Raw row shape; `status` and `errors` need decoding.
#[derive(sqlx::FromRow)]
struct SyncRunRow {
    id: i64,
    started_at: i64,
    finished_at: Option<i64>,
    status: String,
    articles_fetched: i64,
    api_calls: i64,
    errors: String,
}

impl SyncRunRow {
    fn decode(self) -> Result<SyncRun, StorageError> {
        let errors: Vec<String> = serde_json::from_str(&self.errors)
            .map_err(|e| StorageError::Corrupt(format!("sync run errors column: {e}")))?;
        Ok(SyncRun {
            id: self.id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            status: SyncStatus::parse(&self.status)?,
            articles_fetched: self.articles_fetched,
            api_calls: self.api_calls,
            errors,
        })
    }
}

impl Database {
    // ========================================================================
    // Sync Run History
    // ========================================================================

    /// Create a sync run record in the `running` state, returning its id.
    pub async fn create_sync_run(&self, started_at: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO sync_runs (started_at, status) VALUES (?, ?) RETURNING id",
        )
        .bind(started_at)
        .bind(SyncStatus::Running.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Finalize a sync run with its outcome. The errors list is stored as a
    /// JSON array so the history table stays a single flat table.
    pub async fn finalize_sync_run(
        &self,
        sync_id: i64,
        status: SyncStatus,
        articles_fetched: i64,
        api_calls: i64,
        errors: &[String],
        finished_at: i64,
    ) -> Result<()> {
        let errors_json = serde_json::to_string(errors)
            .map_err(|e| StorageError::Corrupt(format!("encoding sync run errors: {e}")))?;

        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = ?, articles_fetched = ?, api_calls = ?, errors = ?, finished_at = ?
            WHERE id = ?
        "#,
        )
        .bind(status.as_str())
        .bind(articles_fetched)
        .bind(api_calls)
        .bind(errors_json)
        .bind(finished_at)
        .bind(sync_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_sync_run(&self, sync_id: i64) -> Result<Option<SyncRun>> {
        let row = sqlx::query_as::<_, SyncRunRow>(
            r#"
            SELECT id, started_at, finished_at, status, articles_fetched, api_calls, errors
            FROM sync_runs
            WHERE id = ?
        "#,
        )
        .bind(sync_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncRunRow::decode).transpose().map_err(Into::into)
    }
}
