use serde::{Deserialize, Serialize};

// ============================================================================
// Upstream API Payloads
// ============================================================================
//
// The upstream is an Inoreader-shaped hosted reader API. These structs are
// the crate's view of its JSON contract; unknown fields are ignored so the
// provider can extend responses without breaking us.

/// Response of `GET /subscription/list`.
#[derive(Debug, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "htmlUrl", default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
}

/// A folder/tag reference attached to a subscription.
#[derive(Debug, Deserialize)]
pub struct CategoryRef {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Response of `GET /tag/list`.
#[derive(Debug, Deserialize)]
pub struct TagList {
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
pub struct Tag {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Upstream id of the parent folder, folders only.
    #[serde(default)]
    pub parent: Option<String>,
    /// "folder" or "tag"; missing means tag.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl Tag {
    pub fn is_folder(&self) -> bool {
        self.kind.as_deref() == Some("folder")
    }

    /// Display name: the explicit label, or the last segment of ids like
    /// `user/-/label/Tech`.
    pub fn name(&self) -> &str {
        if let Some(label) = self.label.as_deref() {
            return label;
        }
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

/// Response of `GET /stream/contents/{stream_id}`. Paginated; `continuation`
/// is present while more items remain.
#[derive(Debug, Deserialize)]
pub struct StreamContents {
    #[serde(default)]
    pub items: Vec<RemoteArticle>,
    #[serde(default)]
    pub continuation: Option<String>,
}

/// One article payload as returned by the stream contents endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteArticle {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub canonical: Vec<Link>,
    #[serde(default)]
    pub published: Option<i64>,
    /// Timestamp of the last upstream state change, when provided.
    #[serde(default)]
    pub updated: Option<i64>,
    #[serde(default)]
    pub summary: Option<ContentBlock>,
    /// Remote read state; None means the provider made no claim.
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub starred: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub content: String,
}

impl RemoteArticle {
    /// The article's canonical link, if the payload carries one.
    pub fn canonical_href(&self) -> Option<&str> {
        self.canonical.first().map(|l| l.href.as_str())
    }

    /// Timestamp used for last-write-wins resolution: the upstream update
    /// time when present, else the publish time, else 0 (always loses).
    pub fn state_timestamp(&self) -> i64 {
        self.updated.or(self.published).unwrap_or(0)
    }

    pub fn body(&self) -> Option<&str> {
        self.summary
            .as_ref()
            .map(|s| s.content.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Response of `GET /unread-count`.
#[derive(Debug, Deserialize)]
pub struct UnreadCounts {
    #[serde(default)]
    pub unreadcounts: Vec<UnreadCount>,
}

#[derive(Debug, Deserialize)]
pub struct UnreadCount {
    pub id: String,
    pub count: i64,
}

/// One entry in the batched state submit (`POST /edit-tag`).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StateChange {
    /// Upstream item id.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<String>,
}

/// Body of `POST /edit-tag`.
#[derive(Debug, Serialize)]
pub struct EditTagRequest {
    pub items: Vec<StateChange>,
}

pub const STATE_READ: &str = "user/-/state/com.google/read";
pub const STATE_STARRED: &str = "user/-/state/com.google/starred";
