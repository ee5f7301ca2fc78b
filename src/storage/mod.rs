mod articles;
mod feeds;
mod quota;
mod retention;
mod schema;
mod sync_runs;
mod types;

pub use schema::Database;
pub use types::{
    Article, ChangeAction, Feed, Folder, NewArticle, PendingChange, QuotaState, StorageError,
    SyncRun, SyncStatus,
};
