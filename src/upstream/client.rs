use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::types::{
    EditTagRequest, StateChange, StreamContents, SubscriptionList, TagList, UnreadCounts,
};

/// Per-call deadline. Applied with tokio::time::timeout so a hung upstream
/// cannot stall a sync run past this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the upstream feed API.
///
/// Fetch-side errors are recovered per feed (the run continues); submit-side
/// errors leave the pending change queue intact for the next flush.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body was not the expected JSON shape
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Client for the hosted reader API.
///
/// Every public method is one logical upstream operation and therefore one
/// quota unit; callers consume from the quota tracker before invoking any
/// of them.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base: Url,
    token: SecretString,
}

impl UpstreamClient {
    pub fn new(base: Url, token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
            token,
        }
    }

    /// List all subscribed feeds.
    pub async fn list_subscriptions(&self) -> Result<SubscriptionList, UpstreamError> {
        self.get_json("subscription/list", &[]).await
    }

    /// List folders and tags.
    pub async fn list_tags(&self) -> Result<TagList, UpstreamError> {
        self.get_json("tag/list", &[]).await
    }

    /// Fetch one page of a feed's stream, newest first. `count` bounds the
    /// page size; pass the previous page's continuation token to advance.
    pub async fn stream_contents(
        &self,
        stream_id: &str,
        count: usize,
        continuation: Option<&str>,
    ) -> Result<StreamContents, UpstreamError> {
        let count_str = count.to_string();
        let mut query: Vec<(&str, &str)> = vec![("n", count_str.as_str())];
        if let Some(token) = continuation {
            query.push(("c", token));
        }
        self.get_json(&format!("stream/contents/{stream_id}"), &query)
            .await
    }

    /// Fetch unread counts for all streams.
    pub async fn unread_counts(&self) -> Result<UnreadCounts, UpstreamError> {
        self.get_json("unread-count", &[]).await
    }

    /// Submit a batch of read/star state changes in one call.
    pub async fn submit_state_changes(
        &self,
        changes: Vec<StateChange>,
    ) -> Result<(), UpstreamError> {
        let url = self.endpoint("edit-tag")?;
        let request = self
            .http
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(&EditTagRequest { items: changes })
            .send();

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request)
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(UpstreamError::Network)?;

        if !response.status().is_success() {
            return Err(UpstreamError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, UpstreamError> {
        let url = self.endpoint(path)?;
        let mut request = self.http.get(url).bearer_auth(self.token.expose_secret());
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(UpstreamError::Network)?;

        if !response.status().is_success() {
            return Err(UpstreamError::HttpStatus(response.status().as_u16()));
        }

        let bytes = response.bytes().await.map_err(UpstreamError::Network)?;
        serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base
            .join(path)
            .map_err(|e| UpstreamError::Decode(format!("invalid endpoint path {path}: {e}")))
    }
}
