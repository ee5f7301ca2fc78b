use anyhow::Result;

use super::schema::Database;
use super::types::{Article, ChangeAction, NewArticle, PendingChange};

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Look up an article by its canonical URL (the deduplication key).
    pub async fn get_article_by_url(&self, canonical_url: &str) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(
            r#"
            SELECT id, feed_id, remote_id, canonical_url, title, published,
                   content, full_content, summary, is_read, is_starred,
                   last_modified, fetched_at
            FROM articles
            WHERE canonical_url = ?
        "#,
        )
        .bind(canonical_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(article)
    }

    pub async fn get_article_by_id(&self, article_id: i64) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(
            r#"
            SELECT id, feed_id, remote_id, canonical_url, title, published,
                   content, full_content, summary, is_read, is_starred,
                   last_modified, fetched_at
            FROM articles
            WHERE id = ?
        "#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(article)
    }

    /// Insert a first-seen article. Returns the new id, or None when a
    /// concurrent writer inserted the same canonical URL first — the caller
    /// then re-reads and merges instead. INSERT OR IGNORE keeps the UNIQUE
    /// constraint from surfacing as an error in that race.
    pub async fn insert_article(&self, article: &NewArticle, now: i64) -> Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO articles
                (feed_id, remote_id, canonical_url, title, published,
                 content, summary, is_read, is_starred, last_modified, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(article.feed_id)
        .bind(&article.remote_id)
        .bind(&article.canonical_url)
        .bind(&article.title)
        .bind(article.published)
        .bind(&article.content)
        .bind(&article.summary)
        .bind(article.is_read)
        .bind(article.is_starred)
        .bind(article.last_modified)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Apply a reconciled merge to an existing article. The reconciler
    /// decides the final field values; this just writes them.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_article_merge(
        &self,
        article_id: i64,
        title: &str,
        published: Option<i64>,
        content: Option<&str>,
        summary: Option<&str>,
        is_read: bool,
        is_starred: bool,
        last_modified: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE articles
            SET title = ?, published = ?, content = ?, summary = ?,
                is_read = ?, is_starred = ?, last_modified = ?
            WHERE id = ?
        "#,
        )
        .bind(title)
        .bind(published)
        .bind(content)
        .bind(summary)
        .bind(is_read)
        .bind(is_starred)
        .bind(last_modified)
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store extracted full content for an article.
    pub async fn set_full_content(&self, article_id: i64, full_content: &str) -> Result<()> {
        sqlx::query("UPDATE articles SET full_content = ? WHERE id = ?")
            .bind(full_content)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_articles(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    // ========================================================================
    // Local State Mutations
    // ========================================================================
    //
    // User actions (read/star toggles) land here. Each sets the flag, bumps
    // last_modified for last-write-wins resolution, and enqueues a pending
    // change for the next upstream flush — all in one transaction so the
    // queue can never disagree with the stored flag.

    /// Set an article's read flag from a local user action.
    pub async fn mark_read_local(&self, article_id: i64, read: bool, now: i64) -> Result<()> {
        let action = if read {
            ChangeAction::Read
        } else {
            ChangeAction::Unread
        };
        self.apply_local_change(article_id, "is_read", read, action, now)
            .await
    }

    /// Set an article's starred flag from a local user action.
    pub async fn set_starred_local(&self, article_id: i64, starred: bool, now: i64) -> Result<()> {
        let action = if starred {
            ChangeAction::Star
        } else {
            ChangeAction::Unstar
        };
        self.apply_local_change(article_id, "is_starred", starred, action, now)
            .await
    }

    async fn apply_local_change(
        &self,
        article_id: i64,
        column: &str,
        value: bool,
        action: ChangeAction,
        now: i64,
    ) -> Result<()> {
        // column is one of two compile-time strings, never user input
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "UPDATE articles SET {column} = ?, last_modified = ? WHERE id = ?"
        ))
        .bind(value)
        .bind(now)
        .bind(article_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO pending_changes (article_id, action, created_at) VALUES (?, ?, ?)")
            .bind(article_id)
            .bind(action.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Pending Change Queue
    // ========================================================================

    /// All queued state changes in enqueue order, joined with the article's
    /// upstream id for submission.
    pub async fn pending_changes(&self) -> Result<Vec<PendingChange>> {
        let rows: Vec<(i64, i64, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT p.id, p.article_id, a.remote_id, p.action, p.created_at
            FROM pending_changes p
            JOIN articles a ON a.id = p.article_id
            ORDER BY p.id ASC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, article_id, article_remote_id, action, created_at)| {
                Ok(PendingChange {
                    id,
                    article_id,
                    article_remote_id,
                    action: ChangeAction::parse(&action)?,
                    created_at,
                })
            })
            .collect()
    }

    pub async fn count_pending_changes(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_changes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Remove flushed changes from the queue after a successful upstream
    /// submit. Changes enqueued after the flush snapshot are untouched.
    pub async fn delete_pending_changes(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM pending_changes WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
