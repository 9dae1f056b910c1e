use super::cache::{QueryCache, QueryData, QueryState, SharedFetch};
use super::key::{QueryKey, ResourceKind};
use super::QueryError;
use crate::api::{ApiError, PageRequest, PostQuery, PostsApi, SearchQuery};
use crate::model::{Channel, Feed, PaginatedResponse, Post, TagSummary};
use crate::notify::Notifier;
use crate::util::MAX_SEARCH_QUERY_LENGTH;
use futures::FutureExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Retry behavior for failed fetches.
///
/// Only transient errors are retried (see [`ApiError::is_retryable`]), with
/// exponential backoff: `base_delay`, `2 * base_delay`, `4 * base_delay`...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        base_delay: Duration::ZERO,
    };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Tunables for a [`QueryClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Maximum number of cached query entries.
    pub cache_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            retry: RetryPolicy::default(),
        }
    }
}

/// A cacheable read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryRequest {
    Posts(PostQuery),
    Post(String),
    Bookmarks(PageRequest),
    Search(SearchQuery),
    Feeds,
    Tags,
    Channels,
}

impl QueryRequest {
    pub fn key(&self) -> QueryKey {
        match self {
            QueryRequest::Posts(query) => QueryKey::posts(query),
            QueryRequest::Post(id) => QueryKey::post(id),
            QueryRequest::Bookmarks(page) => QueryKey::bookmarks(page),
            QueryRequest::Search(query) => QueryKey::search(query),
            QueryRequest::Feeds => QueryKey::prefix(ResourceKind::Feeds),
            QueryRequest::Tags => QueryKey::prefix(ResourceKind::Tags),
            QueryRequest::Channels => QueryKey::prefix(ResourceKind::Channels),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            QueryRequest::Posts(_) => ResourceKind::Posts,
            QueryRequest::Post(_) => ResourceKind::Post,
            QueryRequest::Bookmarks(_) => ResourceKind::Bookmarks,
            QueryRequest::Search(_) => ResourceKind::Search,
            QueryRequest::Feeds => ResourceKind::Feeds,
            QueryRequest::Tags => ResourceKind::Tags,
            QueryRequest::Channels => ResourceKind::Channels,
        }
    }

    async fn execute(&self, api: &dyn PostsApi) -> Result<QueryData, ApiError> {
        Ok(match self {
            QueryRequest::Posts(query) => QueryData::Posts(api.list_posts(query).await?),
            QueryRequest::Post(id) => QueryData::Post(api.get_post(id).await?),
            QueryRequest::Bookmarks(page) => QueryData::Posts(api.list_bookmarks(page).await?),
            QueryRequest::Search(query) => QueryData::Posts(api.search(query).await?),
            QueryRequest::Feeds => QueryData::Feeds(api.list_feeds().await?),
            QueryRequest::Tags => QueryData::Tags(api.list_tags().await?),
            QueryRequest::Channels => QueryData::Channels(api.list_channels().await?),
        })
    }
}

/// Cached, deduplicating front end to a [`PostsApi`].
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct QueryClient {
    pub(super) api: Arc<dyn PostsApi>,
    pub(super) cache: Arc<Mutex<QueryCache>>,
    retry: RetryPolicy,
    pub(super) notifier: Option<Notifier>,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("retry", &self.retry)
            .field("notifier", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}

impl QueryClient {
    pub fn new(api: Arc<dyn PostsApi>, options: ClientOptions) -> Self {
        Self {
            api,
            cache: Arc::new(Mutex::new(QueryCache::new(options.cache_capacity))),
            retry: options.retry,
            notifier: None,
        }
    }

    /// Deliver mutation outcomes to `notifier`.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn api(&self) -> &Arc<dyn PostsApi> {
        &self.api
    }

    pub(super) fn cache(&self) -> MutexGuard<'_, QueryCache> {
        lock_cache(&self.cache)
    }

    // ========================================================================
    // Generic reads
    // ========================================================================

    /// Fresh cached data, or the result of a (possibly shared) fetch.
    pub async fn fetch(&self, request: QueryRequest) -> Result<QueryData, QueryError> {
        let key = request.key();
        let fetch = {
            let mut cache = self.cache();
            if let Some(data) = cache.fresh(&key) {
                tracing::trace!(key = %key, "Serving fresh cached data");
                return Ok(data);
            }
            match cache.in_flight(&key) {
                Some(running) => {
                    tracing::debug!(key = %key, "Joining in-flight fetch");
                    running
                }
                None => self.start_fetch(&mut cache, key, request),
            }
        };
        fetch.await
    }

    /// Always fetch from the server. Supersedes any fetch already running
    /// for the same key: that fetch still resolves for its own callers but
    /// its result is not cached.
    pub async fn refetch(&self, request: QueryRequest) -> Result<QueryData, QueryError> {
        let key = request.key();
        let fetch = {
            let mut cache = self.cache();
            self.start_fetch(&mut cache, key, request)
        };
        fetch.await
    }

    fn start_fetch(
        &self,
        cache: &mut QueryCache,
        key: QueryKey,
        request: QueryRequest,
    ) -> SharedFetch {
        let generation = cache.next_generation();
        let api = Arc::clone(&self.api);
        let store: Weak<Mutex<QueryCache>> = Arc::downgrade(&self.cache);
        let retry = if request.kind().retries_enabled() {
            self.retry
        } else {
            RetryPolicy::NONE
        };
        let fetch_key = key.clone();

        tracing::debug!(key = %key, generation = generation, "Starting fetch");

        let fetch = async move {
            let result = execute_with_retry(api.as_ref(), &request, retry)
                .await
                .map_err(QueryError::from);

            if let Some(store) = store.upgrade() {
                let mut cache = lock_cache(&store);
                if cache.complete_fetch(&fetch_key, generation, &result) {
                    tracing::debug!(
                        key = %fetch_key,
                        ok = result.is_ok(),
                        entries = cache.len(),
                        "Fetch settled"
                    );
                } else {
                    tracing::debug!(
                        key = %fetch_key,
                        generation = generation,
                        "Discarding result of superseded fetch"
                    );
                }
            }
            result
        }
        .boxed()
        .shared();

        cache.register_fetch(key, generation, fetch.clone());
        fetch
    }

    /// Cached data under `key` regardless of freshness.
    pub fn peek(&self, key: &QueryKey) -> Option<QueryData> {
        self.cache().peek(key).cloned()
    }

    /// Loading / error / data state of `key`.
    pub fn state(&self, key: &QueryKey) -> QueryState {
        self.cache().state(key)
    }

    /// Overwrite the cached data under `key`.
    pub fn set_data(&self, key: QueryKey, data: QueryData) {
        self.cache().set(key, data);
    }

    /// Mark every entry under `prefix` stale so the next read refetches it.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let marked = self.cache().invalidate(prefix);
        tracing::debug!(prefix = %prefix, entries = marked, "Invalidated cached queries");
        marked
    }

    /// Forget every entry under `prefix`.
    pub fn remove(&self, prefix: &QueryKey) -> usize {
        let removed = self.cache().remove(prefix);
        tracing::debug!(prefix = %prefix, entries = removed, "Removed cached queries");
        removed
    }

    /// Keys currently cached under `prefix`.
    pub fn cached_keys(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.cache().keys_with_prefix(prefix)
    }

    // ========================================================================
    // Typed reads
    // ========================================================================

    pub async fn posts(&self, query: &PostQuery) -> Result<PaginatedResponse<Post>, QueryError> {
        let request = QueryRequest::Posts(query.clone());
        let key = request.key();
        self.fetch(request)
            .await?
            .into_posts()
            .ok_or(QueryError::UnexpectedData(key))
    }

    pub async fn post(&self, id: &str) -> Result<Post, QueryError> {
        let request = QueryRequest::Post(id.to_string());
        let key = request.key();
        self.fetch(request)
            .await?
            .into_post()
            .ok_or(QueryError::UnexpectedData(key))
    }

    pub async fn bookmarks(&self, page: PageRequest) -> Result<PaginatedResponse<Post>, QueryError> {
        let request = QueryRequest::Bookmarks(page);
        let key = request.key();
        self.fetch(request)
            .await?
            .into_posts()
            .ok_or(QueryError::UnexpectedData(key))
    }

    /// Search posts. A blank query yields an empty page without a request.
    pub async fn search(
        &self,
        q: &str,
        page: PageRequest,
    ) -> Result<PaginatedResponse<Post>, QueryError> {
        let q = q.trim();
        if q.is_empty() {
            return Ok(PaginatedResponse {
                data: Vec::new(),
                total: 0,
                has_more: false,
            });
        }
        if q.chars().count() > MAX_SEARCH_QUERY_LENGTH {
            return Err(ApiError::Validation(format!(
                "Search query exceeds {MAX_SEARCH_QUERY_LENGTH} characters"
            ))
            .into());
        }
        let request = QueryRequest::Search(SearchQuery {
            q: q.to_string(),
            page,
        });
        let key = request.key();
        self.fetch(request)
            .await?
            .into_posts()
            .ok_or(QueryError::UnexpectedData(key))
    }

    pub async fn feeds(&self) -> Result<Vec<Feed>, QueryError> {
        self.fetch(QueryRequest::Feeds)
            .await?
            .into_feeds()
            .ok_or_else(|| QueryError::UnexpectedData(QueryRequest::Feeds.key()))
    }

    pub async fn tags(&self) -> Result<Vec<TagSummary>, QueryError> {
        self.fetch(QueryRequest::Tags)
            .await?
            .into_tags()
            .ok_or_else(|| QueryError::UnexpectedData(QueryRequest::Tags.key()))
    }

    pub async fn channels(&self) -> Result<Vec<Channel>, QueryError> {
        self.fetch(QueryRequest::Channels)
            .await?
            .into_channels()
            .ok_or_else(|| QueryError::UnexpectedData(QueryRequest::Channels.key()))
    }
}

fn lock_cache(cache: &Mutex<QueryCache>) -> MutexGuard<'_, QueryCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `request`, retrying transient failures with exponential backoff.
async fn execute_with_retry(
    api: &dyn PostsApi,
    request: &QueryRequest,
    policy: RetryPolicy,
) -> Result<QueryData, ApiError> {
    let mut retry_count = 0;

    loop {
        match request.execute(api).await {
            Ok(data) => return Ok(data),
            Err(e) if e.is_retryable() && retry_count < policy.max_retries => {
                let delay = policy.base_delay.saturating_mul(1u32 << retry_count.min(16));
                tracing::debug!(
                    error = %e,
                    kind = %request.kind(),
                    retry = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying fetch after transient error"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
