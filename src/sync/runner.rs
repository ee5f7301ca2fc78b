use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::storage::{Database, SyncRun, SyncStatus};
use crate::upstream::types::CategoryRef;
use crate::upstream::UpstreamClient;

use super::{fetch_round_robin, prune_best_effort, QuotaTracker, Reconciler, SyncError};

/// Per-run limits, taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub global_article_cap: usize,
    pub per_feed_article_cap: usize,
    pub retention_limit: i64,
}

/// Running totals carried through one sync pipeline.
#[derive(Default)]
struct RunTotals {
    articles_fetched: i64,
    api_calls: i64,
    errors: Vec<String>,
    quota_exhausted: bool,
    cancelled: bool,
    /// Whether any durable progress was made (articles stored or local
    /// changes flushed). Decides Partial vs Failed on an aborted run.
    committed: bool,
}

/// Orchestrates sync runs: push local changes, refresh feed metadata, fetch
/// articles round-robin, prune retention, and record the run's history row.
pub struct SyncRunner {
    db: Database,
    client: UpstreamClient,
    tracker: QuotaTracker,
    reconciler: Reconciler,
    opts: SyncOptions,
    cancels: Mutex<HashMap<i64, Arc<AtomicBool>>>,
}

impl SyncRunner {
    pub fn new(db: Database, client: UpstreamClient, tracker: QuotaTracker, opts: SyncOptions) -> Self {
        Self {
            reconciler: Reconciler::new(db.clone()),
            db,
            client,
            tracker,
            opts,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Run one full sync, returning the id of its history row. The row is
    /// finalized before this returns, so callers can poll it immediately.
    ///
    /// Only storage failure aborts with `Err`; upstream trouble is recorded
    /// on the run and reflected in its final status.
    pub async fn trigger_sync(&self) -> Result<i64, SyncError> {
        let started = Utc::now().timestamp();
        let sync_id = self.db.create_sync_run(started).await?;
        tracing::info!(sync_id, "Starting sync run");

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags().insert(sync_id, cancel.clone());

        let result = self.execute(&cancel).await;
        self.cancel_flags().remove(&sync_id);

        let totals = match result {
            Ok(totals) => totals,
            Err(e) => {
                // Storage failure: try to leave a failed history row behind
                let msg = e.to_string();
                let _ = self
                    .db
                    .finalize_sync_run(
                        sync_id,
                        SyncStatus::Failed,
                        0,
                        0,
                        &[msg],
                        Utc::now().timestamp(),
                    )
                    .await;
                return Err(e);
            }
        };

        let status = if totals.cancelled {
            SyncStatus::Partial
        } else if totals.errors.is_empty() && !totals.quota_exhausted {
            SyncStatus::Completed
        } else if totals.committed {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        };

        self.db
            .finalize_sync_run(
                sync_id,
                status,
                totals.articles_fetched,
                totals.api_calls,
                &totals.errors,
                Utc::now().timestamp(),
            )
            .await?;

        tracing::info!(
            sync_id,
            status = status.as_str(),
            articles = totals.articles_fetched,
            api_calls = totals.api_calls,
            errors = totals.errors.len(),
            "Sync run finished"
        );
        Ok(sync_id)
    }

    /// Current state of a sync run, for status reporting.
    pub async fn get_sync_status(&self, sync_id: i64) -> Result<Option<SyncRun>, SyncError> {
        Ok(self.db.get_sync_run(sync_id).await?)
    }

    /// Request cancellation of an in-flight run. Takes effect before the
    /// next upstream call; work already committed stays committed. Returns
    /// false if the run is not currently in flight.
    pub fn cancel(&self, sync_id: i64) -> bool {
        match self.cancel_flags().get(&sync_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn cancel_flags(&self) -> MutexGuard<'_, HashMap<i64, Arc<AtomicBool>>> {
        self.cancels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn execute(&self, cancel: &AtomicBool) -> Result<RunTotals, SyncError> {
        let mut totals = RunTotals::default();
        self.tracker.ensure_current_day().await?;

        // Push local changes first so a quota-starved run still delivers
        // the user's reads and stars before spending budget on fetching
        let had_pending = self.db.count_pending_changes().await? > 0;
        match self.reconciler.flush_pending_changes(&self.client, &self.tracker).await {
            Ok(0) => {}
            Ok(flushed) => {
                totals.api_calls += 1;
                totals.committed = true;
                tracing::debug!(flushed, "Pending changes delivered");
            }
            Err(SyncError::QuotaExceeded { used, limit }) => {
                totals
                    .errors
                    .push(format!("Daily API quota exhausted ({used}/{limit})"));
                totals.quota_exhausted = true;
                return Ok(totals);
            }
            Err(SyncError::UpstreamSubmit(e)) => {
                // Queue stays intact; the call still spent a quota unit
                if had_pending {
                    totals.api_calls += 1;
                }
                totals.errors.push(format!("state change submit: {e}"));
            }
            Err(e) => return Err(e),
        }

        if self.check_cancelled(cancel, &mut totals) {
            return Ok(totals);
        }

        // Subscription list is the backbone of the run; without it there is
        // nothing to fetch
        if !self.consume_call(&mut totals).await? {
            return Ok(totals);
        }
        let subscriptions = match self.client.list_subscriptions().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "Subscription list fetch failed, aborting run");
                totals.errors.push(format!("subscription list: {e}"));
                return Ok(totals);
            }
        };
        for sub in &subscriptions.subscriptions {
            let feed_id = self
                .db
                .upsert_feed(&sub.id, &sub.title, &sub.url, sub.html_url.as_deref())
                .await?;
            let mut folder_ids = Vec::with_capacity(sub.categories.len());
            for cat in &sub.categories {
                folder_ids.push(
                    self.db
                        .upsert_folder(&cat.id, category_name(cat), false)
                        .await?,
                );
            }
            self.db.replace_feed_folders(feed_id, &folder_ids).await?;
        }
        tracing::debug!(feeds = subscriptions.subscriptions.len(), "Subscriptions refreshed");

        if self.check_cancelled(cancel, &mut totals) {
            return Ok(totals);
        }

        // Folder hierarchy and tags are metadata; failure here degrades the
        // run but does not stop article fetching
        if !self.consume_call(&mut totals).await? {
            return Ok(totals);
        }
        match self.client.list_tags().await {
            Ok(tags) => {
                for tag in &tags.tags {
                    self.db
                        .upsert_folder(&tag.id, tag.name(), !tag.is_folder())
                        .await?;
                }
                // Second pass: parents may appear later in the list
                for tag in tags.tags.iter().filter(|t| t.is_folder()) {
                    let Some(parent_remote) = tag.parent.as_deref() else {
                        continue;
                    };
                    let child = self.db.get_folder_by_remote_id(&tag.id).await?;
                    let parent = self.db.get_folder_by_remote_id(parent_remote).await?;
                    if let (Some(child), Some(parent)) = (child, parent) {
                        self.db.set_folder_parent(child.id, Some(parent.id)).await?;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Tag list fetch failed, keeping stale folders");
                totals.errors.push(format!("tag list: {e}"));
            }
        }

        if self.check_cancelled(cancel, &mut totals) {
            return Ok(totals);
        }

        if !self.consume_call(&mut totals).await? {
            return Ok(totals);
        }
        match self.client.unread_counts().await {
            Ok(counts) => {
                for entry in &counts.unreadcounts {
                    self.db.set_feed_unread_count(&entry.id, entry.count).await?;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unread count fetch failed, keeping stale counts");
                totals.errors.push(format!("unread counts: {e}"));
            }
        }

        let feeds = self.db.feeds_stale_first().await?;
        let outcome = fetch_round_robin(
            &self.db,
            &self.client,
            &self.tracker,
            &self.reconciler,
            feeds,
            self.opts.global_article_cap,
            self.opts.per_feed_article_cap,
            cancel,
        )
        .await?;

        totals.articles_fetched += outcome.articles_fetched as i64;
        totals.api_calls += outcome.api_calls;
        totals.errors.extend(outcome.errors);
        totals.quota_exhausted |= outcome.quota_exhausted;
        totals.cancelled |= outcome.cancelled;
        totals.committed |= outcome.articles_fetched > 0;

        prune_best_effort(&self.db, self.opts.retention_limit).await;

        Ok(totals)
    }

    /// Consume one quota unit for the next upstream call. Returns false and
    /// flags the run as quota-exhausted if the budget is spent.
    async fn consume_call(&self, totals: &mut RunTotals) -> Result<bool, SyncError> {
        match self.tracker.consume(1).await {
            Ok(_) => {
                totals.api_calls += 1;
                Ok(true)
            }
            Err(SyncError::QuotaExceeded { used, limit }) => {
                tracing::warn!(used, limit, "Daily quota exhausted, ending run early");
                totals
                    .errors
                    .push(format!("Daily API quota exhausted ({used}/{limit})"));
                totals.quota_exhausted = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn check_cancelled(&self, cancel: &AtomicBool, totals: &mut RunTotals) -> bool {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!("Sync run cancelled");
            totals.cancelled = true;
            return true;
        }
        false
    }
}

/// Display name for a category reference: the label when the provider sends
/// one, otherwise the last segment of ids like `user/-/label/Tech`.
fn category_name(cat: &CategoryRef) -> &str {
    if let Some(label) = cat.label.as_deref() {
        return label;
    }
    cat.id.rsplit('/').next().unwrap_or(&cat.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> SyncOptions {
        SyncOptions {
            global_article_cap: 100,
            per_feed_article_cap: 20,
            retention_limit: 1000,
        }
    }

    async fn runner_for(server: &MockServer, quota_limit: i64) -> SyncRunner {
        let db = Database::open(":memory:").await.unwrap();
        let client = UpstreamClient::new(
            Url::parse(&format!("{}/", server.uri())).unwrap(),
            SecretString::from("token"),
        );
        let tracker = QuotaTracker::new(db.clone(), quota_limit, chrono_tz::UTC);
        SyncRunner::new(db, client, tracker, options())
    }

    async fn mount_empty_upstream(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/subscription/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"subscriptions": []})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tag/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": []})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/unread-count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unreadcounts": []})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_empty_upstream_completes_cleanly() {
        let server = MockServer::start().await;
        mount_empty_upstream(&server).await;
        let runner = runner_for(&server, 100).await;

        let sync_id = runner.trigger_sync().await.unwrap();
        let run = runner.get_sync_status(sync_id).await.unwrap().unwrap();

        assert_eq!(run.status, SyncStatus::Completed);
        assert_eq!(run.articles_fetched, 0);
        // Subscriptions, tags, unread counts; no pending flush, no streams
        assert_eq!(run.api_calls, 3);
        assert!(run.finished_at.is_some());
        assert!(run.errors.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_failure_fails_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscription/list"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let runner = runner_for(&server, 100).await;

        let sync_id = runner.trigger_sync().await.unwrap();
        let run = runner.get_sync_status(sync_id).await.unwrap().unwrap();

        assert_eq!(run.status, SyncStatus::Failed);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].contains("subscription list"));
    }

    #[tokio::test]
    async fn test_quota_of_zero_remaining_fails_without_commit() {
        let server = MockServer::start().await;
        mount_empty_upstream(&server).await;
        let runner = runner_for(&server, 1).await;
        // Burn the whole budget before the run
        runner.tracker.consume(1).await.unwrap();

        let sync_id = runner.trigger_sync().await.unwrap();
        let run = runner.get_sync_status(sync_id).await.unwrap().unwrap();

        assert_eq!(run.status, SyncStatus::Failed);
        assert_eq!(run.api_calls, 0);
        assert!(run.errors[0].contains("quota exhausted"));
    }

    #[tokio::test]
    async fn test_folder_hierarchy_resolved_across_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscription/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"subscriptions": []})))
            .mount(&server)
            .await;
        // Child listed before its parent: only a second pass can link them
        Mock::given(method("GET"))
            .and(path("/tag/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": [
                {"id": "user/-/label/Tech", "type": "folder", "parent": "user/-/label/News"},
                {"id": "user/-/label/News", "type": "folder"}
            ]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/unread-count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unreadcounts": []})))
            .mount(&server)
            .await;
        let runner = runner_for(&server, 100).await;

        runner.trigger_sync().await.unwrap();

        let child = runner
            .db
            .get_folder_by_remote_id("user/-/label/Tech")
            .await
            .unwrap()
            .unwrap();
        let parent = runner
            .db
            .get_folder_by_remote_id("user/-/label/News")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(child.parent_id, Some(parent.id));
        assert!(!child.is_tag);
    }

    #[tokio::test]
    async fn test_cancel_live_run_finalizes_partial_with_writes_intact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscription/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"subscriptions": [
                {"id": "feed/alpha", "title": "alpha", "url": "https://alpha.example.com/rss"}
            ]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tag/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/unread-count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unreadcounts": []})))
            .mount(&server)
            .await;
        // Every stream page takes 300ms and always dangles a continuation,
        // so an uncancelled run would keep fetching up to the global cap
        let items: Vec<_> = (0..10)
            .map(|n| {
                json!({
                    "id": format!("item/alpha/{n}"),
                    "title": format!("Article {n}"),
                    "canonical": [{"href": format!("https://alpha.example.com/{n}")}],
                    "published": 1_700_000_000 + n
                })
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/stream/contents/feed/alpha"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"items": items, "continuation": "more"}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let client = UpstreamClient::new(
            Url::parse(&format!("{}/", server.uri())).unwrap(),
            SecretString::from("token"),
        );
        let tracker = QuotaTracker::new(db.clone(), 100, chrono_tz::UTC);
        let runner = Arc::new(SyncRunner::new(
            db.clone(),
            client,
            tracker,
            SyncOptions {
                global_article_cap: 100,
                per_feed_article_cap: 100,
                retention_limit: 1000,
            },
        ));

        let task = tokio::spawn({
            let runner = runner.clone();
            async move { runner.trigger_sync().await }
        });

        // Wait for the first page to commit, then cancel the in-flight run.
        // The first run in a fresh database has id 1.
        let mut cancelled = false;
        for _ in 0..500 {
            if db.count_articles().await.unwrap() >= 10 && runner.cancel(1) {
                cancelled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cancelled, "run never reached a cancellable state");

        let sync_id = task.await.unwrap().unwrap();
        assert_eq!(sync_id, 1);
        let run = runner.get_sync_status(sync_id).await.unwrap().unwrap();

        assert_eq!(run.status, SyncStatus::Partial);
        assert!(run.finished_at.is_some());
        // Committed pages stay committed; the run stopped short of the cap
        assert!(run.articles_fetched >= 10);
        assert!(run.articles_fetched < 100);
        assert!(db
            .get_article_by_url("https://alpha.example.com/0")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_returns_false() {
        let server = MockServer::start().await;
        let runner = runner_for(&server, 100).await;
        assert!(!runner.cancel(42));
    }

    #[tokio::test]
    async fn test_metadata_failures_degrade_to_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscription/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"subscriptions": [
                {"id": "feed/1", "title": "A", "url": "https://a.example.com/rss"}
            ]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tag/list"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/unread-count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unreadcounts": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/stream/contents/feed/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [
                {"id": "item/1", "title": "Hi",
                 "canonical": [{"href": "https://a.example.com/1"}], "published": 100}
            ], "continuation": null})))
            .mount(&server)
            .await;
        let runner = runner_for(&server, 100).await;

        let sync_id = runner.trigger_sync().await.unwrap();
        let run = runner.get_sync_status(sync_id).await.unwrap().unwrap();

        // Articles landed despite the tag list failure
        assert_eq!(run.status, SyncStatus::Partial);
        assert_eq!(run.articles_fetched, 1);
        assert!(run.errors.iter().any(|e| e.contains("tag list")));
    }
}
