//! The sync pipeline: quota tracking, round-robin fetch scheduling,
//! reconciliation, and retention pruning.

mod pruner;
mod quota;
mod reconciler;
mod runner;
mod scheduler;

pub use pruner::prune_best_effort;
pub use quota::QuotaTracker;
pub use reconciler::{Reconciler, UpsertOutcome};
pub use runner::{SyncOptions, SyncRunner};
pub use scheduler::{fetch_round_robin, FetchOutcome, BATCH_UNIT};

use crate::upstream::UpstreamError;
use thiserror::Error;

/// Errors surfaced by the sync pipeline.
///
/// Per-feed and per-article failures are recorded on the SyncRun and do not
/// abort the run; only quota exhaustion and storage unavailability do.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The daily upstream call budget is spent. Aborts the remainder of the
    /// run; not retried until the next quota day.
    #[error("Daily API quota exhausted ({used}/{limit})")]
    QuotaExceeded { used: i64, limit: i64 },

    /// A single feed's fetch failed; the feed is skipped for this run.
    #[error("Fetch failed for feed {feed_id}: {source}")]
    UpstreamFetch {
        feed_id: i64,
        #[source]
        source: UpstreamError,
    },

    /// The batched state-change submit failed; changes stay queued.
    #[error("State change submit failed: {0}")]
    UpstreamSubmit(#[source] UpstreamError),

    /// Persistent storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
