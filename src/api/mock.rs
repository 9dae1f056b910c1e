use super::{ApiError, PageRequest, PostQuery, PostsApi, SearchQuery};
use crate::model::{
    normalize_tag_name, AuthorType, Channel, ChannelCreate, ChannelUpdate, Feed, FeedCreate,
    FeedUpdate, PaginatedResponse, Post, Tag, TagCreate, TagSummary, ALL_FEED_ID,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    posts: Vec<Post>,
    feeds: Vec<Feed>,
    channels: Vec<Channel>,
    /// Tags created through `POST /tags` that may not be attached to any post.
    standalone_tags: Vec<Tag>,
    next_feed_id: u64,
    next_channel_id: u64,
}

/// In-memory stand-in for the posts backend.
///
/// Applies the same filtering rules as the server: a feed id resolves to the
/// feed's tag filters, tag filters match posts carrying ANY of the tags, and
/// search is a case-insensitive substring match over content and channel name.
#[derive(Debug, Default)]
pub struct MockApi {
    state: Mutex<MockState>,
    latency: Option<Duration>,
    fail_status: AtomicU64,
    requests: AtomicUsize,
}

impl MockApi {
    /// An empty backend containing only the reserved "all" feed.
    pub fn empty() -> Self {
        let api = Self::default();
        {
            let mut state = api.state();
            state.feeds.push(Feed {
                id: ALL_FEED_ID.to_string(),
                name: "All Posts".to_string(),
                tag_filters: Vec::new(),
                created_at: Some(Utc::now()),
            });
            state.next_feed_id = 1;
            state.next_channel_id = 1;
        }
        api
    }

    /// A backend seeded with sample posts, feeds and channels.
    pub fn with_sample_data() -> Self {
        let api = Self::empty();
        {
            let mut state = api.state();
            state.posts = sample_posts();
            for (name, filters) in [
                ("Research Papers", vec!["research-paper", "arxiv"]),
                ("Tutorials", vec!["tutorial", "educational"]),
            ] {
                let id = state.next_feed_id;
                state.next_feed_id += 1;
                state.feeds.push(Feed {
                    id: id.to_string(),
                    name: name.to_string(),
                    tag_filters: filters.into_iter().map(String::from).collect(),
                    created_at: Some(Utc::now()),
                });
            }
            for (username, name) in [
                ("mlresearch", "ML Research Daily"),
                ("dlnews", "Deep Learning News"),
                ("aieng", "AI Engineering"),
            ] {
                let id = state.next_channel_id;
                state.next_channel_id += 1;
                state.channels.push(Channel {
                    id: id.to_string(),
                    username: username.to_string(),
                    name: name.to_string(),
                    is_active: true,
                    channel_id: None,
                    latest_message_id: None,
                    created_at: Some(Utc::now()),
                    updated_at: Some(Utc::now()),
                });
            }
        }
        api
    }

    /// Delay every call, simulating network round trips.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every subsequent call fail with the given HTTP status.
    /// `None` restores normal behavior.
    pub fn set_failure(&self, status: Option<u16>) {
        self.fail_status
            .store(status.map(u64::from).unwrap_or(0), Ordering::SeqCst);
    }

    /// Number of calls received so far, including failed ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Insert or replace a post.
    pub fn insert_post(&self, post: Post) {
        let mut state = self.state();
        state.posts.retain(|p| p.id != post.id);
        state.posts.push(post);
    }

    /// Current server-side copy of a post.
    pub fn post(&self, id: &str) -> Option<Post> {
        self.state().posts.iter().find(|p| p.id == id).cloned()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn begin(&self, op: &str) -> Result<(), ApiError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.fail_status.load(Ordering::SeqCst) {
            0 => {
                tracing::trace!(op = %op, "Mock API call");
                Ok(())
            }
            status => Err(ApiError::HttpStatus(status as u16)),
        }
    }
}

fn not_found(what: &str, id: &str) -> ApiError {
    ApiError::NotFound(format!("{what} {id}"))
}

fn newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

#[async_trait]
impl PostsApi for MockApi {
    async fn list_posts(&self, query: &PostQuery) -> Result<PaginatedResponse<Post>, ApiError> {
        self.begin("list_posts").await?;
        let state = self.state();

        let explicit_tags = query.tags.clone().filter(|t| !t.is_empty());
        let filters = match (explicit_tags, query.feed_id.as_deref()) {
            (Some(tags), _) => tags,
            (None, Some(feed_id)) if !feed_id.is_empty() && feed_id != ALL_FEED_ID => state
                .feeds
                .iter()
                .find(|f| f.id == feed_id)
                .map(|f| f.tag_filters.clone())
                .ok_or_else(|| not_found("feed", feed_id))?,
            _ => Vec::new(),
        };
        let needle = query
            .search
            .as_deref()
            .map(str::to_lowercase)
            .filter(|s| !s.is_empty());

        let mut matching: Vec<Post> = state
            .posts
            .iter()
            .filter(|p| p.matches_any_tag(&filters))
            .filter(|p| needle.as_deref().map_or(true, |n| post_contains(p, n)))
            .cloned()
            .collect();
        newest_first(&mut matching);

        Ok(PaginatedResponse::from_slice(
            &matching,
            query.page.offset() as usize,
            query.page.limit as usize,
        ))
    }

    async fn get_post(&self, id: &str) -> Result<Post, ApiError> {
        self.begin("get_post").await?;
        self.post(id).ok_or_else(|| not_found("post", id))
    }

    async fn update_post_tags(&self, id: &str, tags: &[Tag]) -> Result<Post, ApiError> {
        self.begin("update_post_tags").await?;
        let mut state = self.state();
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found("post", id))?;

        let now = Utc::now();
        let mut updated: Vec<Tag> = Vec::with_capacity(tags.len());
        for tag in tags {
            let name = normalize_tag_name(&tag.name);
            if name.is_empty() || updated.iter().any(|t| t.name == name) {
                continue;
            }
            updated.push(Tag {
                name,
                author_type: tag.author_type,
                created_at: Some(tag.created_at.unwrap_or(now)),
            });
        }
        post.tags = updated;
        Ok(post.clone())
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, ApiError> {
        self.begin("list_feeds").await?;
        Ok(self.state().feeds.clone())
    }

    async fn create_feed(&self, feed: &FeedCreate) -> Result<Feed, ApiError> {
        self.begin("create_feed").await?;
        let mut state = self.state();
        let id = state.next_feed_id;
        state.next_feed_id += 1;
        let created = Feed {
            id: id.to_string(),
            name: feed.name.clone(),
            tag_filters: feed.tag_filters.clone(),
            created_at: Some(Utc::now()),
        };
        state.feeds.push(created.clone());
        Ok(created)
    }

    async fn update_feed(&self, id: &str, update: &FeedUpdate) -> Result<Feed, ApiError> {
        self.begin("update_feed").await?;
        let mut state = self.state();
        let feed = state
            .feeds
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| not_found("feed", id))?;
        if let Some(name) = &update.name {
            feed.name = name.clone();
        }
        if let Some(filters) = &update.tag_filters {
            feed.tag_filters = filters.clone();
        }
        Ok(feed.clone())
    }

    async fn delete_feed(&self, id: &str) -> Result<(), ApiError> {
        self.begin("delete_feed").await?;
        let mut state = self.state();
        let before = state.feeds.len();
        state.feeds.retain(|f| f.id != id);
        if state.feeds.len() == before {
            return Err(not_found("feed", id));
        }
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<TagSummary>, ApiError> {
        self.begin("list_tags").await?;
        let state = self.state();

        let mut summaries: BTreeMap<String, TagSummary> = BTreeMap::new();
        for tag in state.posts.iter().flat_map(|p| p.tags.iter()) {
            summaries
                .entry(tag.name.clone())
                .or_insert_with(|| TagSummary {
                    name: tag.name.clone(),
                    count: 0,
                    source: tag.author_type,
                })
                .count += 1;
        }
        for tag in &state.standalone_tags {
            summaries.entry(tag.name.clone()).or_insert_with(|| TagSummary {
                name: tag.name.clone(),
                count: 0,
                source: tag.author_type,
            });
        }
        Ok(summaries.into_values().collect())
    }

    async fn create_tag(&self, tag: &TagCreate) -> Result<Tag, ApiError> {
        self.begin("create_tag").await?;
        let mut state = self.state();
        let name = normalize_tag_name(&tag.name);
        let exists = state.standalone_tags.iter().any(|t| t.name == name)
            || state.posts.iter().any(|p| p.has_tag(&name));
        if exists {
            return Err(ApiError::HttpStatus(400));
        }
        let created = Tag {
            name,
            author_type: tag.author_type,
            created_at: Some(Utc::now()),
        };
        state.standalone_tags.push(created.clone());
        Ok(created)
    }

    async fn delete_tag(&self, name: &str) -> Result<(), ApiError> {
        self.begin("delete_tag").await?;
        let mut state = self.state();
        let mut found = false;
        state.standalone_tags.retain(|t| {
            let keep = t.name != name;
            found |= !keep;
            keep
        });
        for post in state.posts.iter_mut() {
            let before = post.tags.len();
            post.tags.retain(|t| t.name != name);
            found |= post.tags.len() != before;
        }
        if !found {
            return Err(not_found("tag", name));
        }
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, ApiError> {
        self.begin("list_channels").await?;
        Ok(self.state().channels.clone())
    }

    async fn add_channel(&self, channel: &ChannelCreate) -> Result<Channel, ApiError> {
        self.begin("add_channel").await?;
        let mut state = self.state();
        let username = channel.username.trim_start_matches('@').to_string();
        if state.channels.iter().any(|c| c.username == username) {
            return Err(ApiError::HttpStatus(400));
        }
        let id = state.next_channel_id;
        state.next_channel_id += 1;
        let now = Utc::now();
        let created = Channel {
            id: id.to_string(),
            name: channel.name.clone().unwrap_or_else(|| username.clone()),
            username,
            is_active: channel.is_active,
            channel_id: None,
            latest_message_id: None,
            created_at: Some(now),
            updated_at: Some(now),
        };
        state.channels.push(created.clone());
        Ok(created)
    }

    async fn update_channel(
        &self,
        username: &str,
        update: &ChannelUpdate,
    ) -> Result<Channel, ApiError> {
        self.begin("update_channel").await?;
        let mut state = self.state();
        let channel = state
            .channels
            .iter_mut()
            .find(|c| c.username == username)
            .ok_or_else(|| not_found("channel", username))?;
        if let Some(name) = &update.name {
            channel.name = name.clone();
        }
        if let Some(active) = update.is_active {
            channel.is_active = active;
        }
        channel.updated_at = Some(Utc::now());
        Ok(channel.clone())
    }

    async fn remove_channel(&self, username: &str) -> Result<(), ApiError> {
        self.begin("remove_channel").await?;
        let mut state = self.state();
        let before = state.channels.len();
        state.channels.retain(|c| c.username != username);
        if state.channels.len() == before {
            return Err(not_found("channel", username));
        }
        Ok(())
    }

    async fn add_bookmark(&self, post_id: &str) -> Result<(), ApiError> {
        self.begin("add_bookmark").await?;
        set_bookmarked(&mut self.state(), post_id, true)
    }

    async fn remove_bookmark(&self, post_id: &str) -> Result<(), ApiError> {
        self.begin("remove_bookmark").await?;
        set_bookmarked(&mut self.state(), post_id, false)
    }

    async fn list_bookmarks(
        &self,
        page: &PageRequest,
    ) -> Result<PaginatedResponse<Post>, ApiError> {
        self.begin("list_bookmarks").await?;
        let mut bookmarked: Vec<Post> = self
            .state()
            .posts
            .iter()
            .filter(|p| p.is_bookmarked)
            .cloned()
            .collect();
        newest_first(&mut bookmarked);
        Ok(PaginatedResponse::from_slice(
            &bookmarked,
            page.offset() as usize,
            page.limit as usize,
        ))
    }

    async fn search(&self, query: &SearchQuery) -> Result<PaginatedResponse<Post>, ApiError> {
        self.begin("search").await?;
        let needle = query.q.to_lowercase();
        let mut found: Vec<Post> = self
            .state()
            .posts
            .iter()
            .filter(|p| post_contains(p, &needle))
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(PaginatedResponse::from_slice(
            &found,
            query.page.offset() as usize,
            query.page.limit as usize,
        ))
    }
}

fn post_contains(post: &Post, needle_lower: &str) -> bool {
    post.content.to_lowercase().contains(needle_lower)
        || post.channel_name.to_lowercase().contains(needle_lower)
}

fn set_bookmarked(state: &mut MockState, post_id: &str, value: bool) -> Result<(), ApiError> {
    let post = state
        .posts
        .iter_mut()
        .find(|p| p.id == post_id)
        .ok_or_else(|| not_found("post", post_id))?;
    post.is_bookmarked = value;
    Ok(())
}

fn sample_posts() -> Vec<Post> {
    let now = Utc::now();
    let tag = |name: &str, author_type| Tag {
        name: name.to_string(),
        author_type,
        created_at: Some(now),
    };

    vec![
        Post {
            id: "1".to_string(),
            channel_name: "ML Research Daily".to_string(),
            channel_username: "mlresearch".to_string(),
            content: "New paper: \"Attention is All You Need v2\" proposes sparse attention \
                      patterns and adaptive computation time for 30% better efficiency."
                .to_string(),
            media_urls: Some(Vec::new()),
            original_url: "https://t.me/mlresearch/1234".to_string(),
            published_at: now - ChronoDuration::hours(2),
            tags: vec![
                tag("transformers", AuthorType::Llm),
                tag("research-paper", AuthorType::Llm),
                tag("important", AuthorType::Human),
            ],
            is_bookmarked: false,
            created_at: now,
        },
        Post {
            id: "2".to_string(),
            channel_name: "Deep Learning News".to_string(),
            channel_username: "dlnews".to_string(),
            content: "New model checkpoint released with improved reasoning capabilities. \
                      Benchmarks show gains on mathematical reasoning tasks."
                .to_string(),
            media_urls: Some(vec!["https://via.placeholder.com/600x400".to_string()]),
            original_url: "https://t.me/dlnews/5678".to_string(),
            published_at: now - ChronoDuration::hours(5),
            tags: vec![
                tag("llm", AuthorType::Llm),
                tag("news", AuthorType::Llm),
                tag("openai", AuthorType::Llm),
            ],
            is_bookmarked: true,
            created_at: now,
        },
        Post {
            id: "3".to_string(),
            channel_name: "AI Engineering".to_string(),
            channel_username: "aieng".to_string(),
            content: "Tutorial: how to fine-tune LLaMA 3 on custom datasets. Step-by-step \
                      guide with code examples and data preparation tips."
                .to_string(),
            media_urls: Some(Vec::new()),
            original_url: "https://t.me/aieng/9012".to_string(),
            published_at: now - ChronoDuration::hours(24),
            tags: vec![
                tag("tutorial", AuthorType::Llm),
                tag("fine-tuning", AuthorType::Llm),
                tag("llama", AuthorType::Llm),
                tag("educational", AuthorType::Human),
            ],
            is_bookmarked: false,
            created_at: now,
        },
    ]
}
