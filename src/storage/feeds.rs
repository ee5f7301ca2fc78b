use anyhow::Result;

use super::schema::Database;
use super::types::{Feed, Folder};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Upsert a feed discovered from the upstream subscription list,
    /// returning its local id. Metadata is refreshed on conflict; sync
    /// bookkeeping columns (last_fetched, newest_published, unread_count)
    /// are left untouched.
    pub async fn upsert_feed(
        &self,
        remote_id: &str,
        title: &str,
        url: &str,
        site_url: Option<&str>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (remote_id, title, url, site_url)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(remote_id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                site_url = excluded.site_url
            RETURNING id
        "#,
        )
        .bind(remote_id)
        .bind(title)
        .bind(url)
        .bind(site_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// All feeds ordered stale-first: never-fetched feeds lead, then
    /// ascending last_fetched, with id as a deterministic tie-break.
    /// This is the scheduler's round-robin iteration order.
    pub async fn feeds_stale_first(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, remote_id, title, url, site_url,
                   last_fetched, newest_published, unread_count
            FROM feeds
            ORDER BY (last_fetched IS NULL) DESC, last_fetched ASC, id ASC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    /// Record a successful fetch of a feed, advancing its staleness cursor.
    pub async fn mark_feed_fetched(
        &self,
        feed_id: i64,
        now: i64,
        newest_published: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched = ?,
                newest_published = MAX(COALESCE(newest_published, 0), COALESCE(?, 0))
            WHERE id = ?
        "#,
        )
        .bind(now)
        .bind(newest_published)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update the cached unread count for a feed by its upstream id.
    /// Unknown ids are ignored (the upstream response also covers folder
    /// and system streams we do not track per-feed).
    pub async fn set_feed_unread_count(&self, remote_id: &str, count: i64) -> Result<()> {
        sqlx::query("UPDATE feeds SET unread_count = ? WHERE remote_id = ?")
            .bind(count)
            .bind(remote_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Folder / Tag Operations
    // ========================================================================

    /// Upsert a folder or tag by its upstream id, returning the local id.
    pub async fn upsert_folder(&self, remote_id: &str, name: &str, is_tag: bool) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO folders (remote_id, name, is_tag)
            VALUES (?, ?, ?)
            ON CONFLICT(remote_id) DO UPDATE SET
                name = excluded.name,
                is_tag = excluded.is_tag
            RETURNING id
        "#,
        )
        .bind(remote_id)
        .bind(name)
        .bind(is_tag)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Set (or clear) the hierarchy parent of a folder. Tags stay flat, so
    /// callers only invoke this for folders.
    pub async fn set_folder_parent(&self, folder_id: i64, parent_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE folders SET parent_id = ? WHERE id = ?")
            .bind(parent_id)
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_folder_by_remote_id(&self, remote_id: &str) -> Result<Option<Folder>> {
        let folder = sqlx::query_as::<_, Folder>(
            "SELECT id, remote_id, name, parent_id, is_tag FROM folders WHERE remote_id = ?",
        )
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(folder)
    }

    /// Replace a feed's folder memberships with the given set.
    pub async fn replace_feed_folders(&self, feed_id: i64, folder_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM feed_folders WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        for folder_id in folder_ids {
            sqlx::query("INSERT OR IGNORE INTO feed_folders (feed_id, folder_id) VALUES (?, ?)")
                .bind(feed_id)
                .bind(folder_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Folder ids a feed belongs to, in id order.
    pub async fn folder_ids_for_feed(&self, feed_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT folder_id FROM feed_folders WHERE feed_id = ? ORDER BY folder_id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
