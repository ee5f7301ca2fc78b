use std::sync::atomic::{AtomicBool, Ordering};

use crate::storage::{Database, Feed};
use crate::upstream::UpstreamClient;

use super::{Reconciler, SyncError};

/// Articles requested per feed per round. One round-robin pass hands every
/// active feed one page of this size before any feed gets a second page, so
/// no feed can starve the others of the global budget.
pub const BATCH_UNIT: usize = 10;

/// Aggregate result of the fetch phase of one sync run.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Remote article payloads received (and handed to the reconciler).
    pub articles_fetched: usize,
    /// Upstream calls consumed by this phase.
    pub api_calls: i64,
    /// Per-feed and per-article errors; these did not abort the run.
    pub errors: Vec<String>,
    /// The daily quota ran out mid-phase and the remainder was aborted.
    pub quota_exhausted: bool,
    /// The run was cancelled between upstream calls.
    pub cancelled: bool,
}

struct FeedSlot {
    feed: Feed,
    fetched: usize,
    continuation: Option<String>,
    newest_published: Option<i64>,
    active: bool,
    touched: bool,
}

/// Fetch articles across feeds in round-robin rounds, streaming each page
/// into the reconciler as it arrives.
///
/// Feeds are visited in the caller-provided (stale-first) order. Each visit
/// requests `min(BATCH_UNIT, per-feed remainder, global remainder)` articles
/// and costs one quota unit. A feed is retired when it returns a short page,
/// runs out of continuation, hits the per-feed cap, or fails; the phase ends
/// when the global cap is reached, every feed is retired, quota runs out, or
/// the run is cancelled.
///
/// Per-feed and per-article failures are recorded in the outcome and do not
/// abort the phase. Only storage failure from the quota tracker itself
/// returns `Err`.
#[allow(clippy::too_many_arguments)]
pub async fn fetch_round_robin(
    db: &Database,
    client: &UpstreamClient,
    tracker: &super::QuotaTracker,
    reconciler: &Reconciler,
    feeds: Vec<Feed>,
    global_cap: usize,
    per_feed_cap: usize,
    cancel: &AtomicBool,
) -> Result<FetchOutcome, SyncError> {
    let now = chrono::Utc::now().timestamp();
    let mut outcome = FetchOutcome::default();
    let mut slots: Vec<FeedSlot> = feeds
        .into_iter()
        .map(|feed| FeedSlot {
            feed,
            fetched: 0,
            continuation: None,
            newest_published: None,
            active: true,
            touched: false,
        })
        .collect();

    let mut total = 0usize;
    'rounds: while total < global_cap && slots.iter().any(|s| s.active) {
        for slot in slots.iter_mut().filter(|s| s.active) {
            if total >= global_cap {
                break 'rounds;
            }
            if cancel.load(Ordering::Relaxed) {
                tracing::info!("Sync cancelled, stopping fetch phase");
                outcome.cancelled = true;
                break 'rounds;
            }

            let want = BATCH_UNIT
                .min(per_feed_cap.saturating_sub(slot.fetched))
                .min(global_cap - total);
            if want == 0 {
                slot.active = false;
                continue;
            }

            match tracker.consume(1).await {
                Ok(_) => outcome.api_calls += 1,
                Err(SyncError::QuotaExceeded { used, limit }) => {
                    tracing::warn!(used, limit, "Daily quota exhausted, aborting fetch phase");
                    outcome
                        .errors
                        .push(format!("Daily API quota exhausted ({used}/{limit})"));
                    outcome.quota_exhausted = true;
                    break 'rounds;
                }
                Err(e) => return Err(e),
            }

            let page = match client
                .stream_contents(&slot.feed.remote_id, want, slot.continuation.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    let err = SyncError::UpstreamFetch {
                        feed_id: slot.feed.id,
                        source: e,
                    };
                    tracing::warn!(
                        feed_id = slot.feed.id,
                        feed = %slot.feed.remote_id,
                        error = %err,
                        "Skipping feed for this run"
                    );
                    outcome.errors.push(format!("{err} ({})", slot.feed.title));
                    slot.active = false;
                    continue;
                }
            };

            let got = page.items.len().min(want);
            for item in page.items.iter().take(want) {
                if let Some(published) = item.published {
                    slot.newest_published =
                        Some(slot.newest_published.map_or(published, |n| n.max(published)));
                }
                // Per-article isolation: one bad row does not abort the run
                if let Err(e) = reconciler.upsert_article(slot.feed.id, item, now).await {
                    tracing::warn!(
                        feed_id = slot.feed.id,
                        item = %item.id,
                        error = %e,
                        "Failed to reconcile article"
                    );
                    outcome
                        .errors
                        .push(format!("article {} in feed {}: {e}", item.id, slot.feed.id));
                }
            }

            slot.fetched += got;
            total += got;
            slot.touched = true;
            slot.continuation = page.continuation;

            // A short page or a missing continuation means the feed has no
            // more articles for us this run
            if got < want || slot.continuation.is_none() {
                slot.active = false;
            }
        }
    }

    outcome.articles_fetched = total;

    // Advance staleness cursors for every feed we actually fetched
    for slot in slots.iter().filter(|s| s.touched) {
        if let Err(e) = db
            .mark_feed_fetched(slot.feed.id, now, slot.newest_published)
            .await
        {
            tracing::warn!(feed_id = slot.feed.id, error = %e, "Failed to record feed fetch time");
        }
    }

    Ok(outcome)
}
