use anyhow::Result;

use crate::storage::{ChangeAction, Database, NewArticle};
use crate::upstream::types::{StateChange, STATE_READ, STATE_STARRED};
use crate::upstream::{RemoteArticle, UpstreamClient};
use crate::util::canonicalize_url;

use super::{QuotaTracker, SyncError};

/// Result of reconciling one remote article payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting of this canonical URL; a row was created.
    Inserted(i64),
    /// Existing row updated with merged fields.
    Updated(i64),
    /// Existing row already matched the merge result.
    Unchanged(i64),
    /// Payload had no usable canonical URL and was dropped.
    Skipped,
}

/// Merges remote article payloads with local state and pushes queued local
/// read/star changes back upstream.
#[derive(Clone)]
pub struct Reconciler {
    db: Database,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert one remote article, deduplicating by canonical URL.
    ///
    /// State flags resolve last-write-wins on `last_modified`: the side with
    /// the newer timestamp keeps its flags, and a tie goes to the remote as
    /// the authoritative source. Content fields are only overwritten by
    /// non-empty remote data, so a sparse payload never blanks stored text.
    pub async fn upsert_article(
        &self,
        feed_id: i64,
        remote: &RemoteArticle,
        now: i64,
    ) -> Result<UpsertOutcome> {
        let Some(href) = remote.canonical_href() else {
            tracing::warn!(item = %remote.id, "Remote article has no canonical URL, skipping");
            return Ok(UpsertOutcome::Skipped);
        };
        let canonical_url = match canonicalize_url(href) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(item = %remote.id, url = %href, error = %e, "Unusable canonical URL, skipping");
                return Ok(UpsertOutcome::Skipped);
            }
        };

        let remote_ts = remote.state_timestamp();

        if self.db.get_article_by_url(&canonical_url).await?.is_none() {
            let new = NewArticle {
                feed_id,
                remote_id: remote.id.clone(),
                canonical_url: canonical_url.clone(),
                title: remote.title.clone(),
                published: remote.published,
                content: remote.body().map(str::to_owned),
                summary: None,
                is_read: remote.read.unwrap_or(false),
                is_starred: remote.starred.unwrap_or(false),
                last_modified: remote_ts,
            };
            // None means a concurrent writer inserted this URL between our
            // lookup and the insert; fall through to the merge path.
            if let Some(id) = self.db.insert_article(&new, now).await? {
                return Ok(UpsertOutcome::Inserted(id));
            }
        }

        let local = self
            .db
            .get_article_by_url(&canonical_url)
            .await?
            .ok_or_else(|| anyhow::anyhow!("article vanished during upsert: {canonical_url}"))?;

        // Content: non-empty remote data overwrites, empty keeps local
        let title = if remote.title.is_empty() {
            local.title.clone()
        } else {
            remote.title.clone()
        };
        let published = remote.published.or(local.published);
        let content = remote
            .body()
            .map(str::to_owned)
            .or_else(|| local.content.clone());

        // Flags: last-write-wins, ties favor the remote
        let remote_wins = remote_ts >= local.last_modified;
        let (is_read, is_starred, last_modified) = if remote_wins {
            (
                remote.read.unwrap_or(local.is_read),
                remote.starred.unwrap_or(local.is_starred),
                remote_ts,
            )
        } else {
            (local.is_read, local.is_starred, local.last_modified)
        };

        let unchanged = title == local.title
            && published == local.published
            && content == local.content
            && is_read == local.is_read
            && is_starred == local.is_starred
            && last_modified == local.last_modified;
        if unchanged {
            return Ok(UpsertOutcome::Unchanged(local.id));
        }

        self.db
            .apply_article_merge(
                local.id,
                &title,
                published,
                content.as_deref(),
                local.summary.as_deref(),
                is_read,
                is_starred,
                last_modified,
            )
            .await?;

        Ok(UpsertOutcome::Updated(local.id))
    }

    /// Submit all queued local read/star changes upstream in one batched
    /// call (one quota unit), deleting them from the queue on success.
    ///
    /// On submit failure the queue is left intact for the next flush:
    /// at-least-once delivery, which the upstream's idempotent mark-as-read
    /// semantics tolerate. Returns the number of changes flushed.
    pub async fn flush_pending_changes(
        &self,
        client: &UpstreamClient,
        tracker: &QuotaTracker,
    ) -> Result<usize, SyncError> {
        let pending = self.db.pending_changes().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let changes: Vec<StateChange> = pending
            .iter()
            .map(|p| match p.action {
                ChangeAction::Read => StateChange {
                    id: p.article_remote_id.clone(),
                    add: Some(STATE_READ.to_string()),
                    remove: None,
                },
                ChangeAction::Unread => StateChange {
                    id: p.article_remote_id.clone(),
                    add: None,
                    remove: Some(STATE_READ.to_string()),
                },
                ChangeAction::Star => StateChange {
                    id: p.article_remote_id.clone(),
                    add: Some(STATE_STARRED.to_string()),
                    remove: None,
                },
                ChangeAction::Unstar => StateChange {
                    id: p.article_remote_id.clone(),
                    add: None,
                    remove: Some(STATE_STARRED.to_string()),
                },
            })
            .collect();

        // The call attempt itself consumes quota, success or not
        tracker.consume(1).await?;

        client
            .submit_state_changes(changes)
            .await
            .map_err(SyncError::UpstreamSubmit)?;

        let ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
        self.db.delete_pending_changes(&ids).await?;

        tracing::info!(flushed = ids.len(), "Flushed pending state changes upstream");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::upstream::types::{ContentBlock, Link};
    use secrecy::SecretString;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (Database, Reconciler, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .upsert_feed("feed/1", "Feed", "https://feed.example.com/rss", None)
            .await
            .unwrap();
        (db.clone(), Reconciler::new(db), feed)
    }

    fn remote(url: &str, ts: i64) -> RemoteArticle {
        RemoteArticle {
            id: format!("item/{url}"),
            title: "Remote Title".to_string(),
            canonical: vec![Link {
                href: url.to_string(),
            }],
            published: Some(ts),
            updated: None,
            summary: Some(ContentBlock {
                content: "remote body".to_string(),
            }),
            read: Some(false),
            starred: Some(false),
        }
    }

    #[tokio::test]
    async fn test_first_sighting_inserts() {
        let (db, reconciler, feed) = setup().await;

        let outcome = reconciler
            .upsert_article(feed, &remote("https://example.com/a", 1000), 2000)
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::Inserted(_)));

        let article = db
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.title, "Remote Title");
        assert_eq!(article.content.as_deref(), Some("remote body"));
        assert!(!article.is_read);
    }

    #[tokio::test]
    async fn test_same_payload_twice_is_one_row_unchanged() {
        let (db, reconciler, feed) = setup().await;
        let payload = remote("https://example.com/a", 1000);

        reconciler.upsert_article(feed, &payload, 2000).await.unwrap();
        let outcome = reconciler.upsert_article(feed, &payload, 2001).await.unwrap();

        assert!(matches!(outcome, UpsertOutcome::Unchanged(_)));
        assert_eq!(db.count_articles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_equivalent_urls_deduplicate() {
        let (db, reconciler, feed) = setup().await;

        reconciler
            .upsert_article(feed, &remote("https://example.com/a/", 1000), 2000)
            .await
            .unwrap();
        reconciler
            .upsert_article(feed, &remote("HTTPS://EXAMPLE.com/a#frag", 1000), 2001)
            .await
            .unwrap();

        assert_eq!(db.count_articles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_newer_local_change_wins() {
        let (db, reconciler, feed) = setup().await;
        reconciler
            .upsert_article(feed, &remote("https://example.com/a", 1000), 2000)
            .await
            .unwrap();
        let article = db
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();

        // Local read at t=5000, then remote claims unread at t=1000
        db.mark_read_local(article.id, true, 5000).await.unwrap();
        reconciler
            .upsert_article(feed, &remote("https://example.com/a", 1000), 2001)
            .await
            .unwrap();

        let after = db.get_article_by_id(article.id).await.unwrap().unwrap();
        assert!(after.is_read, "local newer change must win");
        assert_eq!(after.last_modified, 5000);
    }

    #[tokio::test]
    async fn test_newer_remote_state_wins() {
        let (db, reconciler, feed) = setup().await;
        reconciler
            .upsert_article(feed, &remote("https://example.com/a", 1000), 2000)
            .await
            .unwrap();
        let article = db
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        db.mark_read_local(article.id, true, 3000).await.unwrap();

        // Remote unread claim stamped newer than the local change
        let mut payload = remote("https://example.com/a", 1000);
        payload.updated = Some(4000);
        reconciler.upsert_article(feed, &payload, 2001).await.unwrap();

        let after = db.get_article_by_id(article.id).await.unwrap().unwrap();
        assert!(!after.is_read, "newer remote state must win");
        assert_eq!(after.last_modified, 4000);
    }

    #[tokio::test]
    async fn test_timestamp_tie_favors_remote() {
        let (db, reconciler, feed) = setup().await;
        reconciler
            .upsert_article(feed, &remote("https://example.com/a", 1000), 2000)
            .await
            .unwrap();
        let article = db
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        db.mark_read_local(article.id, true, 3000).await.unwrap();

        let mut payload = remote("https://example.com/a", 1000);
        payload.updated = Some(3000); // exact tie

        reconciler.upsert_article(feed, &payload, 2001).await.unwrap();
        let after = db.get_article_by_id(article.id).await.unwrap().unwrap();
        assert!(!after.is_read, "tie must favor the remote value");
    }

    #[tokio::test]
    async fn test_empty_remote_content_keeps_local() {
        let (db, reconciler, feed) = setup().await;
        reconciler
            .upsert_article(feed, &remote("https://example.com/a", 1000), 2000)
            .await
            .unwrap();

        let mut sparse = remote("https://example.com/a", 1000);
        sparse.updated = Some(9000);
        sparse.title = String::new();
        sparse.summary = None;
        reconciler.upsert_article(feed, &sparse, 2001).await.unwrap();

        let article = db
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.title, "Remote Title");
        assert_eq!(article.content.as_deref(), Some("remote body"));
    }

    #[tokio::test]
    async fn test_payload_without_url_is_skipped() {
        let (db, reconciler, feed) = setup().await;
        let mut payload = remote("https://example.com/a", 1000);
        payload.canonical.clear();

        let outcome = reconciler.upsert_article(feed, &payload, 2000).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped);
        assert_eq!(db.count_articles().await.unwrap(), 0);
    }

    async fn flush_fixture(db: &Database, reconciler: &Reconciler, feed: i64) {
        reconciler
            .upsert_article(feed, &remote("https://example.com/a", 1000), 2000)
            .await
            .unwrap();
        let article = db
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        db.mark_read_local(article.id, true, 3000).await.unwrap();
        db.set_starred_local(article.id, true, 3001).await.unwrap();
    }

    fn test_client(server: &MockServer) -> UpstreamClient {
        UpstreamClient::new(
            Url::parse(&format!("{}/", server.uri())).unwrap(),
            SecretString::from("token"),
        )
    }

    #[tokio::test]
    async fn test_flush_drains_queue_on_success() {
        let (db, reconciler, feed) = setup().await;
        flush_fixture(&db, &reconciler, feed).await;
        let tracker = QuotaTracker::new(db.clone(), 10, chrono_tz::UTC);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/edit-tag"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let flushed = reconciler
            .flush_pending_changes(&test_client(&server), &tracker)
            .await
            .unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(db.count_pending_changes().await.unwrap(), 0);
        assert_eq!(tracker.state().await.unwrap().calls_used, 1);
    }

    #[tokio::test]
    async fn test_flush_failure_leaves_queue_intact() {
        let (db, reconciler, feed) = setup().await;
        flush_fixture(&db, &reconciler, feed).await;
        let tracker = QuotaTracker::new(db.clone(), 10, chrono_tz::UTC);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/edit-tag"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = reconciler
            .flush_pending_changes(&test_client(&server), &tracker)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UpstreamSubmit(_)));
        // Queue intact for the next attempt, but the call attempt still
        // consumed a quota unit
        assert_eq!(db.count_pending_changes().await.unwrap(), 2);
        assert_eq!(tracker.state().await.unwrap().calls_used, 1);
    }

    #[tokio::test]
    async fn test_flush_with_empty_queue_consumes_nothing() {
        let (db, reconciler, _feed) = setup().await;
        let tracker = QuotaTracker::new(db.clone(), 10, chrono_tz::UTC);

        let server = MockServer::start().await;
        let flushed = reconciler
            .flush_pending_changes(&test_client(&server), &tracker)
            .await
            .unwrap();
        assert_eq!(flushed, 0);
        assert_eq!(tracker.state().await.unwrap().calls_used, 0);
    }
}
