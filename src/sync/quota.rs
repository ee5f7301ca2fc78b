use chrono::Utc;
use chrono_tz::Tz;

use crate::storage::{Database, QuotaState};

use super::SyncError;

/// Gates all upstream API calls against the daily budget.
///
/// State lives in the `quota_state` table, one row per calendar day in the
/// configured timezone, and is mutated only through conditional updates —
/// the limit holds across process restarts and across a scheduled daemon
/// racing a manual sync.
#[derive(Clone)]
pub struct QuotaTracker {
    db: Database,
    limit: i64,
    tz: Tz,
}

impl QuotaTracker {
    pub fn new(db: Database, limit: i64, tz: Tz) -> Self {
        Self { db, limit, tz }
    }

    /// Today's quota day key in the configured timezone.
    fn current_day(&self) -> String {
        Utc::now().with_timezone(&self.tz).format("%Y-%m-%d").to_string()
    }

    /// Idempotent daily reset: creates today's row with zero usage if the
    /// day has rolled over, no-op otherwise.
    pub async fn ensure_current_day(&self) -> Result<(), SyncError> {
        self.db
            .ensure_quota_day(&self.current_day(), self.limit)
            .await?;
        Ok(())
    }

    /// Whether `n` more calls fit within today's budget. No side effect;
    /// a positive answer can still lose the race to a concurrent consumer,
    /// so callers must still go through `consume`.
    pub async fn can_consume(&self, n: i64) -> Result<bool, SyncError> {
        self.ensure_current_day().await?;
        let state = self.state().await?;
        Ok(state.calls_used + n <= state.calls_limit)
    }

    /// Atomically consume `n` quota units, or fail with `QuotaExceeded`
    /// leaving the counter untouched.
    pub async fn consume(&self, n: i64) -> Result<QuotaState, SyncError> {
        let day = self.current_day();
        self.db.ensure_quota_day(&day, self.limit).await?;

        match self.db.try_consume_quota(&day, n).await? {
            Some(state) => Ok(state),
            None => {
                let state = self.db.quota_state(&day).await?;
                let used = state.as_ref().map(|s| s.calls_used).unwrap_or(0);
                let limit = state.as_ref().map(|s| s.calls_limit).unwrap_or(self.limit);
                Err(SyncError::QuotaExceeded { used, limit })
            }
        }
    }

    /// Current quota state for reporting.
    pub async fn state(&self) -> Result<QuotaState, SyncError> {
        let day = self.current_day();
        self.db.ensure_quota_day(&day, self.limit).await?;
        let state = self.db.quota_state(&day).await?;
        state.ok_or_else(|| {
            SyncError::Storage(anyhow::anyhow!("quota row missing after ensure for {day}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn tracker(limit: i64) -> QuotaTracker {
        let db = Database::open(":memory:").await.unwrap();
        QuotaTracker::new(db, limit, chrono_tz::UTC)
    }

    #[tokio::test]
    async fn test_consume_until_exhausted() {
        let tracker = tracker(3).await;

        for expected in 1..=3 {
            let state = tracker.consume(1).await.unwrap();
            assert_eq!(state.calls_used, expected);
        }

        let err = tracker.consume(1).await.unwrap_err();
        match err {
            SyncError::QuotaExceeded { used, limit } => {
                assert_eq!(used, 3);
                assert_eq!(limit, 3);
            }
            e => panic!("Expected QuotaExceeded, got {e:?}"),
        }
    }

    #[tokio::test]
    async fn test_can_consume_reflects_budget() {
        let tracker = tracker(5).await;
        assert!(tracker.can_consume(5).await.unwrap());
        assert!(!tracker.can_consume(6).await.unwrap());

        tracker.consume(4).await.unwrap();
        assert!(tracker.can_consume(1).await.unwrap());
        assert!(!tracker.can_consume(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_consume_has_no_side_effect() {
        let tracker = tracker(5).await;
        tracker.consume(4).await.unwrap();

        assert!(tracker.consume(2).await.is_err());
        let state = tracker.state().await.unwrap();
        assert_eq!(state.calls_used, 4);
    }

    #[tokio::test]
    async fn test_ensure_current_day_is_idempotent() {
        let tracker = tracker(10).await;
        tracker.ensure_current_day().await.unwrap();
        tracker.consume(7).await.unwrap();
        tracker.ensure_current_day().await.unwrap();

        let state = tracker.state().await.unwrap();
        assert_eq!(state.calls_used, 7);
    }
}
