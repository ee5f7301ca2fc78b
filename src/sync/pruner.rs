use crate::storage::Database;

/// Prune stored articles down to `limit`, oldest non-starred first.
///
/// Retention is housekeeping: a failure here never fails the sync run that
/// triggered it, it only logs. Returns the number of rows deleted.
pub async fn prune_best_effort(db: &Database, limit: i64) -> u64 {
    match db.prune_articles(limit).await {
        Ok(0) => 0,
        Ok(deleted) => {
            tracing::info!(deleted, limit, "Pruned old articles");
            deleted
        }
        Err(e) => {
            tracing::warn!(error = %e, "Retention pruning failed, will retry after next sync");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, NewArticle};

    async fn seed(db: &Database, feed_id: i64, n: usize) {
        for i in 0..n {
            let article = NewArticle {
                feed_id,
                remote_id: format!("item/{i}"),
                canonical_url: format!("https://example.com/{i}"),
                title: format!("Article {i}"),
                published: Some(1_000 + i as i64),
                content: None,
                summary: None,
                is_read: false,
                is_starred: false,
                last_modified: 0,
            };
            db.insert_article(&article, 2_000).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_prunes_down_to_limit() {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .upsert_feed("feed/1", "Feed", "https://example.com/rss", None)
            .await
            .unwrap();
        seed(&db, feed, 10).await;

        assert_eq!(prune_best_effort(&db, 4).await, 6);
        assert_eq!(db.count_articles().await.unwrap(), 4);

        // Already under the limit: no-op
        assert_eq!(prune_best_effort(&db, 4).await, 0);
    }
}
