mod client;
pub mod types;

pub use client::{UpstreamClient, UpstreamError};
pub use types::{RemoteArticle, StateChange, StreamContents, Subscription, Tag, UnreadCount};
