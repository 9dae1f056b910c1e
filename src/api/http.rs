use super::{ApiError, PageRequest, PostQuery, PostsApi, SearchQuery};
use crate::model::{
    Channel, ChannelCreate, ChannelUpdate, Feed, FeedCreate, FeedUpdate, PaginatedResponse, Post,
    Tag, TagCreate, TagRef, TagSummary, TagsUpdate,
};
use crate::util::validate_base_url;
use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `GET /feeds` wraps its list in an object.
#[derive(Deserialize)]
struct FeedsEnvelope {
    feeds: Vec<Feed>,
}

/// `GET /tags` and `GET /channels` have been served both bare and wrapped.
#[derive(Deserialize)]
#[serde(untagged)]
enum TagsBody {
    Wrapped { tags: Vec<TagSummary> },
    Bare(Vec<TagSummary>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChannelsBody {
    Wrapped { channels: Vec<Channel> },
    Bare(Vec<Channel>),
}

/// reqwest-backed client for the posts REST API.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpApi {
    /// Build a client for `base_url` (e.g. `http://localhost:8000/api`).
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let base_url =
            validate_base_url(base_url).map_err(|e| ApiError::InvalidBaseUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("postfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;

        tracing::debug!(base_url = %base_url, "Configured posts API client");

        Ok(Self {
            client,
            base_url,
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, ApiError> {
        let bytes = self.send(request, what).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(format!("{what}: {e}")))
    }

    async fn send_empty(&self, request: reqwest::RequestBuilder, what: &str) -> Result<(), ApiError> {
        self.send(request, what).await.map(|_| ())
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Vec<u8>, ApiError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout)?
            .map_err(ApiError::Network)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            tracing::debug!(status = %status, request = %what, "API request failed");
            return Err(ApiError::HttpStatus(status.as_u16()));
        }

        read_limited_bytes(response, MAX_RESPONSE_SIZE).await
    }
}

#[async_trait]
impl PostsApi for HttpApi {
    async fn list_posts(&self, query: &PostQuery) -> Result<PaginatedResponse<Post>, ApiError> {
        let url = self.endpoint(&["posts"])?;
        let request = self.client.get(url).query(&query.to_params());
        self.send_json(request, "posts").await
    }

    async fn get_post(&self, id: &str) -> Result<Post, ApiError> {
        let url = self.endpoint(&["posts", id])?;
        self.send_json(self.client.get(url), &format!("post {id}"))
            .await
    }

    async fn update_post_tags(&self, id: &str, tags: &[Tag]) -> Result<Post, ApiError> {
        let url = self.endpoint(&["posts", id, "tags"])?;
        let body = TagsUpdate {
            tags: tags.iter().map(TagRef::from).collect(),
        };
        self.send_json(self.client.patch(url).json(&body), &format!("post {id}"))
            .await
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, ApiError> {
        let url = self.endpoint(&["feeds"])?;
        let envelope: FeedsEnvelope = self.send_json(self.client.get(url), "feeds").await?;
        Ok(envelope.feeds)
    }

    async fn create_feed(&self, feed: &FeedCreate) -> Result<Feed, ApiError> {
        let url = self.endpoint(&["feeds"])?;
        self.send_json(self.client.post(url).json(feed), "feeds")
            .await
    }

    async fn update_feed(&self, id: &str, update: &FeedUpdate) -> Result<Feed, ApiError> {
        let url = self.endpoint(&["feeds", id])?;
        self.send_json(self.client.patch(url).json(update), &format!("feed {id}"))
            .await
    }

    async fn delete_feed(&self, id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["feeds", id])?;
        self.send_empty(self.client.delete(url), &format!("feed {id}"))
            .await
    }

    async fn list_tags(&self) -> Result<Vec<TagSummary>, ApiError> {
        let url = self.endpoint(&["tags"])?;
        let body: TagsBody = self.send_json(self.client.get(url), "tags").await?;
        Ok(match body {
            TagsBody::Wrapped { tags } | TagsBody::Bare(tags) => tags,
        })
    }

    async fn create_tag(&self, tag: &TagCreate) -> Result<Tag, ApiError> {
        let url = self.endpoint(&["tags"])?;
        self.send_json(self.client.post(url).json(tag), "tags")
            .await
    }

    async fn delete_tag(&self, name: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["tags", name])?;
        self.send_empty(self.client.delete(url), &format!("tag {name}"))
            .await
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, ApiError> {
        let url = self.endpoint(&["channels"])?;
        let body: ChannelsBody = self.send_json(self.client.get(url), "channels").await?;
        Ok(match body {
            ChannelsBody::Wrapped { channels } | ChannelsBody::Bare(channels) => channels,
        })
    }

    async fn add_channel(&self, channel: &ChannelCreate) -> Result<Channel, ApiError> {
        let url = self.endpoint(&["channels"])?;
        self.send_json(self.client.post(url).json(channel), "channels")
            .await
    }

    async fn update_channel(
        &self,
        username: &str,
        update: &ChannelUpdate,
    ) -> Result<Channel, ApiError> {
        let url = self.endpoint(&["channels", username])?;
        self.send_json(
            self.client.patch(url).json(update),
            &format!("channel {username}"),
        )
        .await
    }

    async fn remove_channel(&self, username: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["channels", username])?;
        self.send_empty(self.client.delete(url), &format!("channel {username}"))
            .await
    }

    async fn add_bookmark(&self, post_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["bookmarks", post_id])?;
        self.send_empty(self.client.post(url), &format!("post {post_id}"))
            .await
    }

    async fn remove_bookmark(&self, post_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["bookmarks", post_id])?;
        self.send_empty(self.client.delete(url), &format!("bookmark {post_id}"))
            .await
    }

    async fn list_bookmarks(
        &self,
        page: &PageRequest,
    ) -> Result<PaginatedResponse<Post>, ApiError> {
        let url = self.endpoint(&["bookmarks"])?;
        let request = self
            .client
            .get(url)
            .query(&[("limit", page.limit), ("offset", page.offset())]);
        self.send_json(request, "bookmarks").await
    }

    async fn search(&self, query: &SearchQuery) -> Result<PaginatedResponse<Post>, ApiError> {
        let url = self.endpoint(&["search"])?;
        let request = self.client.get(url).query(&[
            ("q", query.q.clone()),
            ("limit", query.page.limit.to_string()),
            ("offset", query.page.offset().to_string()),
        ]);
        self.send_json(request, "search").await
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ApiError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let api = HttpApi::new("http://localhost:8000/api/", None).unwrap();
        let url = api.endpoint(&["tags", "machine learning"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/tags/machine%20learning");
    }

    #[test]
    fn test_endpoint_on_root_base() {
        let api = HttpApi::new("https://example.com", None).unwrap();
        let url = api.endpoint(&["posts", "1"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/posts/1");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            HttpApi::new("ftp://example.com", None),
            Err(ApiError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_tags_body_accepts_both_shapes() {
        let wrapped: TagsBody =
            serde_json::from_str(r#"{"tags":[{"name":"llm","count":3,"source":"llm"}]}"#).unwrap();
        let bare: TagsBody = serde_json::from_str(
            r#"[{"id":1,"name":"llm","author_type":"llm","usage_count":3,"created_at":"2024-01-01T00:00:00Z"}]"#,
        )
        .unwrap();
        for body in [wrapped, bare] {
            let tags = match body {
                TagsBody::Wrapped { tags } | TagsBody::Bare(tags) => tags,
            };
            assert_eq!(tags.len(), 1);
            assert_eq!(tags[0].count, 3);
        }
    }
}
