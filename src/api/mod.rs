//! Remote API client for the posts backend.
//!
//! [`PostsApi`] is the seam between the query cache and the transport.
//! [`HttpApi`] talks to the real REST server; [`MockApi`] is an in-memory
//! backend used when mock data is enabled and in tests.
mod http;
mod mock;

pub use http::HttpApi;
pub use mock::MockApi;

use crate::model::{
    Channel, ChannelCreate, ChannelUpdate, Feed, FeedCreate, FeedUpdate, PaginatedResponse, Post,
    Tag, TagCreate, TagSummary, DEFAULT_PAGE_SIZE,
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by API calls.
///
/// Validation errors are produced client-side before any request is sent.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid response body: {0}")]
    Decode(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ApiError {
    /// Returns true if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Network(_) => true,
            ApiError::HttpStatus(status) => *status >= 500,
            ApiError::NotFound(_)
            | ApiError::Decode(_)
            | ApiError::Validation(_)
            | ApiError::ResponseTooLarge(_)
            | ApiError::InvalidBaseUrl(_) => false,
        }
    }
}

// ============================================================================
// Request Parameters
// ============================================================================

/// 1-based page plus page size. Converted to `limit`/`offset` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn offset(&self) -> u32 {
        (self.page.max(1) - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// Parameters of a post listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PostQuery {
    pub page: PageRequest,
    pub feed_id: Option<String>,
    pub tags: Option<Vec<String>>,
    pub search: Option<String>,
}

impl PostQuery {
    /// Query-string pairs in the shape the server expects.
    pub(crate) fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("limit", self.page.limit.to_string()),
            ("offset", self.page.offset().to_string()),
        ];
        if let Some(feed_id) = self.feed_id.as_deref().filter(|f| !f.is_empty()) {
            params.push(("feed_id", feed_id.to_string()));
        }
        if let Some(tags) = self.tags.as_ref().filter(|t| !t.is_empty()) {
            params.push(("tags", tags.join(",")));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            params.push(("search", search.to_string()));
        }
        params
    }
}

/// Parameters of a full-text search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub q: String,
    pub page: PageRequest,
}

// ============================================================================
// API Trait
// ============================================================================

/// Operations exposed by the posts backend.
#[async_trait]
pub trait PostsApi: Send + Sync {
    async fn list_posts(&self, query: &PostQuery) -> Result<PaginatedResponse<Post>, ApiError>;
    async fn get_post(&self, id: &str) -> Result<Post, ApiError>;
    async fn update_post_tags(&self, id: &str, tags: &[Tag]) -> Result<Post, ApiError>;

    async fn list_feeds(&self) -> Result<Vec<Feed>, ApiError>;
    async fn create_feed(&self, feed: &FeedCreate) -> Result<Feed, ApiError>;
    async fn update_feed(&self, id: &str, update: &FeedUpdate) -> Result<Feed, ApiError>;
    async fn delete_feed(&self, id: &str) -> Result<(), ApiError>;

    async fn list_tags(&self) -> Result<Vec<TagSummary>, ApiError>;
    async fn create_tag(&self, tag: &TagCreate) -> Result<Tag, ApiError>;
    async fn delete_tag(&self, name: &str) -> Result<(), ApiError>;

    async fn list_channels(&self) -> Result<Vec<Channel>, ApiError>;
    async fn add_channel(&self, channel: &ChannelCreate) -> Result<Channel, ApiError>;
    async fn update_channel(
        &self,
        username: &str,
        update: &ChannelUpdate,
    ) -> Result<Channel, ApiError>;
    async fn remove_channel(&self, username: &str) -> Result<(), ApiError>;

    async fn add_bookmark(&self, post_id: &str) -> Result<(), ApiError>;
    async fn remove_bookmark(&self, post_id: &str) -> Result<(), ApiError>;
    async fn list_bookmarks(&self, page: &PageRequest)
        -> Result<PaginatedResponse<Post>, ApiError>;

    async fn search(&self, query: &SearchQuery) -> Result<PaginatedResponse<Post>, ApiError>;
}
