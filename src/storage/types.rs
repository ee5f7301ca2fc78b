use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another process has the database locked
    #[error("The database is locked by another feedsync process. Please try again.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Stored value could not be decoded (corrupt status or errors column)
    #[error("Corrupt database value: {0}")]
    Corrupt(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StorageError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StorageError::Locked;
        }

        StorageError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed, mirrored from the upstream subscription list.
///
/// `newest_published` is the last-known article timestamp for the feed and
/// orders feeds stale-first in the scheduler. `unread_count` is a cache of
/// the upstream unread-count response, not derived locally.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub remote_id: String,
    pub title: String,
    pub url: String,
    pub site_url: Option<String>,
    pub last_fetched: Option<i64>,
    pub newest_published: Option<i64>,
    pub unread_count: i64,
}

/// A folder or tag grouping feeds. Folders may nest via `parent_id`;
/// tags are flat (`parent_id` is always NULL when `is_tag`).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Folder {
    pub id: i64,
    pub remote_id: String,
    pub name: String,
    pub parent_id: Option<i64>,
    pub is_tag: bool,
}

/// A locally stored article.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub remote_id: String,
    pub canonical_url: String,
    pub title: String,
    pub published: Option<i64>,
    pub content: Option<String>,
    pub full_content: Option<String>,
    pub summary: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    /// Unix timestamp of the last state change, used for last-write-wins
    /// conflict resolution against remote state.
    pub last_modified: i64,
    pub fetched_at: i64,
}

/// Fields for a first-time article insert.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: i64,
    pub remote_id: String,
    pub canonical_url: String,
    pub title: String,
    pub published: Option<i64>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub last_modified: i64,
}

// ============================================================================
// Pending State Changes
// ============================================================================

/// A local read/star change awaiting upstream submission.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum ChangeAction {
    Read,
    Unread,
    Star,
    Unstar,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Read => "read",
            ChangeAction::Unread => "unread",
            ChangeAction::Star => "star",
            ChangeAction::Unstar => "unstar",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "read" => Ok(ChangeAction::Read),
            "unread" => Ok(ChangeAction::Unread),
            "star" => Ok(ChangeAction::Star),
            "unstar" => Ok(ChangeAction::Unstar),
            other => Err(StorageError::Corrupt(format!(
                "unknown pending change action: {other}"
            ))),
        }
    }
}

/// A queued state change joined with the article's upstream identifier,
/// which is what the submit endpoint addresses items by.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub id: i64,
    pub article_id: i64,
    pub article_remote_id: String,
    pub action: ChangeAction,
    pub created_at: i64,
}

// ============================================================================
// Sync Runs
// ============================================================================

/// Lifecycle state of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            "partial" => Ok(SyncStatus::Partial),
            other => Err(StorageError::Corrupt(format!(
                "unknown sync run status: {other}"
            ))),
        }
    }
}

/// A record of one sync attempt. Retained for operational history and
/// never pruned.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: SyncStatus,
    pub articles_fetched: i64,
    pub api_calls: i64,
    pub errors: Vec<String>,
}

// ============================================================================
// Quota
// ============================================================================

/// Daily upstream API call budget, one row per calendar day in the
/// configured timezone.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuotaState {
    pub day: String,
    pub calls_used: i64,
    pub calls_limit: i64,
}

impl QuotaState {
    pub fn remaining(&self) -> i64 {
        (self.calls_limit - self.calls_used).max(0)
    }
}
