use super::key::{QueryKey, ResourceKind};
use super::QueryError;
use crate::api::PageRequest;
use crate::model::{Channel, Feed, PaginatedResponse, Post, TagSummary};
use futures::future::{BoxFuture, Shared};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

/// Deduplicated fetch shared by every caller asking for the same key.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<QueryData, QueryError>>>;

/// Fallback when a zero capacity is configured.
const MIN_CAPACITY: NonZeroUsize = match NonZeroUsize::new(16) {
    Some(n) => n,
    None => unreachable!(),
};

// ============================================================================
// Cached Data
// ============================================================================

/// Data stored under a query key.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    /// A page of posts: listings, bookmarks and search results.
    Posts(PaginatedResponse<Post>),
    Post(Post),
    Feeds(Vec<Feed>),
    Tags(Vec<TagSummary>),
    Channels(Vec<Channel>),
}

impl QueryData {
    pub fn into_posts(self) -> Option<PaginatedResponse<Post>> {
        match self {
            QueryData::Posts(page) => Some(page),
            _ => None,
        }
    }

    pub fn into_post(self) -> Option<Post> {
        match self {
            QueryData::Post(post) => Some(post),
            _ => None,
        }
    }

    pub fn into_feeds(self) -> Option<Vec<Feed>> {
        match self {
            QueryData::Feeds(feeds) => Some(feeds),
            _ => None,
        }
    }

    pub fn into_tags(self) -> Option<Vec<TagSummary>> {
        match self {
            QueryData::Tags(tags) => Some(tags),
            _ => None,
        }
    }

    pub fn into_channels(self) -> Option<Vec<Channel>> {
        match self {
            QueryData::Channels(channels) => Some(channels),
            _ => None,
        }
    }

    /// Every cached copy of the post with `id` in this entry.
    pub fn find_post(&self, id: &str) -> Option<&Post> {
        match self {
            QueryData::Posts(page) => page.data.iter().find(|p| p.id == id),
            QueryData::Post(post) if post.id == id => Some(post),
            _ => None,
        }
    }

    /// Apply `f` to the post with `id` if this entry contains it.
    ///
    /// Returns true if a post was patched.
    pub fn patch_post(&mut self, id: &str, f: impl FnOnce(&mut Post)) -> bool {
        let target = match self {
            QueryData::Posts(page) => page.data.iter_mut().find(|p| p.id == id),
            QueryData::Post(post) if post.id == id => Some(post),
            _ => None,
        };
        match target {
            Some(post) => {
                f(post);
                true
            }
            None => false,
        }
    }

    /// Drop the post with `id` from a page, decrementing the page total.
    ///
    /// With the page's position known, `has_more` is recomputed as the
    /// server would report it once the gap is backfilled. Returns true if
    /// the post was present.
    pub fn remove_post(&mut self, id: &str, position: Option<PageRequest>) -> bool {
        let QueryData::Posts(page) = self else {
            return false;
        };
        let before = page.data.len();
        page.data.retain(|p| p.id != id);
        if page.data.len() == before {
            return false;
        }
        page.total = page.total.saturating_sub(1);
        if let Some(position) = position {
            let end = u64::from(position.offset()) + u64::from(position.limit);
            page.has_more = end < page.total;
        }
        true
    }
}

// ============================================================================
// Entries and Observable State
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CacheEntry {
    pub data: QueryData,
    pub updated_at: Instant,
    /// Set by invalidation; forces a refetch on next access.
    pub invalidated: bool,
}

impl CacheEntry {
    fn is_fresh(&self, kind: Option<ResourceKind>, now: Instant) -> bool {
        if self.invalidated {
            return false;
        }
        // unknown resources always revalidate
        match kind.map_or(Some(Duration::ZERO), |k| k.stale_time()) {
            None => true,
            Some(window) => now.duration_since(self.updated_at) < window,
        }
    }
}

/// Fetch activity of a key.
///
/// Tracks the fetch registered for the key. A fetch cancelled by an
/// optimistic transaction still resolves for the callers awaiting it, but the
/// key reports `Idle` from then on because that result will not be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
}

/// Snapshot of what the cache knows about one key.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub data: Option<QueryData>,
    pub status: FetchStatus,
    pub error: Option<QueryError>,
    pub is_stale: bool,
    pub updated_at: Option<Instant>,
}

impl QueryState {
    /// Nothing cached yet and a fetch is running.
    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.status == FetchStatus::Fetching
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

// ============================================================================
// Query Cache
// ============================================================================

/// Keyed store of fetched data plus the table of running fetches.
///
/// Entries are evicted least-recently-used once `capacity` is reached. Fetch
/// errors live in their own LRU of the same capacity and leave with their
/// entry.
/// Every fetch gets a generation number; a fetch may only write its result
/// while it is still the registered in-flight fetch for its key.
pub(crate) struct QueryCache {
    entries: LruCache<QueryKey, CacheEntry>,
    in_flight: HashMap<QueryKey, InFlight>,
    errors: LruCache<QueryKey, QueryError>,
    next_generation: u64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(MIN_CAPACITY);
        Self {
            entries: LruCache::new(capacity),
            in_flight: HashMap::new(),
            errors: LruCache::new(capacity),
            next_generation: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Cached data if it is still fresh.
    pub fn fresh(&mut self, key: &QueryKey) -> Option<QueryData> {
        let now = Instant::now();
        let kind = key.kind();
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(kind, now))
            .map(|entry| entry.data.clone())
    }

    /// Cached data regardless of freshness, without touching LRU order.
    pub fn peek(&self, key: &QueryKey) -> Option<&QueryData> {
        self.entries.peek(key).map(|entry| &entry.data)
    }

    pub fn set(&mut self, key: QueryKey, data: QueryData) {
        self.errors.pop(&key);
        self.insert(
            key,
            CacheEntry {
                data,
                updated_at: Instant::now(),
                invalidated: false,
            },
        );
    }

    fn insert(&mut self, key: QueryKey, entry: CacheEntry) {
        if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                self.errors.pop(&evicted);
            }
        }
    }

    pub fn state(&self, key: &QueryKey) -> QueryState {
        let now = Instant::now();
        let entry = self.entries.peek(key);
        QueryState {
            data: entry.map(|e| e.data.clone()),
            status: if self.in_flight.contains_key(key) {
                FetchStatus::Fetching
            } else {
                FetchStatus::Idle
            },
            error: self.errors.peek(key).cloned(),
            is_stale: entry.map_or(true, |e| !e.is_fresh(key.kind(), now)),
            updated_at: entry.map(|e| e.updated_at),
        }
    }

    /// Keys currently cached under `prefix`.
    pub fn keys_with_prefix(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Mark every entry under `prefix` stale. Returns the number of entries marked.
    pub fn invalidate(&mut self, prefix: &QueryKey) -> usize {
        let mut marked = 0;
        for (key, entry) in self.entries.iter_mut() {
            if key.starts_with(prefix) {
                entry.invalidated = true;
                marked += 1;
            }
        }
        marked
    }

    /// Drop in-flight fetches under `prefix`; their results will be discarded.
    pub fn cancel(&mut self, prefix: &QueryKey) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|key, _| !key.starts_with(prefix));
        before - self.in_flight.len()
    }

    // ------------------------------------------------------------------------
    // Fetch bookkeeping
    // ------------------------------------------------------------------------

    pub fn in_flight(&self, key: &QueryKey) -> Option<SharedFetch> {
        self.in_flight.get(key).map(|f| f.fetch.clone())
    }

    pub fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Register `fetch` as the current fetch for `key`, superseding any older one.
    pub fn register_fetch(&mut self, key: QueryKey, generation: u64, fetch: SharedFetch) {
        self.in_flight.insert(key, InFlight { generation, fetch });
    }

    /// Record the outcome of a fetch. Returns false if the fetch was
    /// superseded or cancelled and its result was discarded.
    pub fn complete_fetch(
        &mut self,
        key: &QueryKey,
        generation: u64,
        result: &Result<QueryData, QueryError>,
    ) -> bool {
        let current = self
            .in_flight
            .get(key)
            .is_some_and(|f| f.generation == generation);
        if !current {
            return false;
        }
        self.in_flight.remove(key);

        match result {
            Ok(data) => self.set(key.clone(), data.clone()),
            // Previously cached data is kept so views can keep showing it.
            Err(e) => {
                self.errors.put(key.clone(), e.clone());
            }
        }
        true
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    pub fn snapshot(&self, prefixes: &[QueryKey]) -> Vec<(QueryKey, CacheEntry)> {
        self.entries
            .iter()
            .filter(|(key, _)| prefixes.iter().any(|p| key.starts_with(p)))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Patch the data of every entry under `prefixes`. Returns the number of
    /// entries `patch` reported as changed.
    pub fn patch(
        &mut self,
        prefixes: &[QueryKey],
        mut patch: impl FnMut(&QueryKey, &mut QueryData) -> bool,
    ) -> usize {
        let mut changed = 0;
        for (key, entry) in self.entries.iter_mut() {
            if prefixes.iter().any(|p| key.starts_with(p)) && patch(key, &mut entry.data) {
                changed += 1;
            }
        }
        changed
    }

    /// Drop every entry under `prefix`. Returns the number of entries dropped.
    pub fn remove(&mut self, prefix: &QueryKey) -> usize {
        let doomed = self.keys_with_prefix(prefix);
        for key in &doomed {
            self.entries.pop(key);
            self.errors.pop(key);
        }
        doomed.len()
    }

    /// Put `snapshots` back exactly as taken, in their original recency
    /// order. Entries under `prefixes` that did not exist when the snapshot
    /// was taken are dropped.
    pub fn restore(&mut self, prefixes: &[QueryKey], snapshots: Vec<(QueryKey, CacheEntry)>) {
        let stray: Vec<QueryKey> = self
            .entries
            .iter()
            .filter(|(key, _)| prefixes.iter().any(|p| key.starts_with(p)))
            .filter(|(key, _)| !snapshots.iter().any(|(k, _)| k == *key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stray {
            self.entries.pop(&key);
        }
        // snapshots run most recent first
        for (key, entry) in snapshots.into_iter().rev() {
            self.insert(key, entry);
        }
    }

    /// Look for any cached copy of a post.
    pub fn find_post(&self, id: &str) -> Option<Post> {
        let single = QueryKey::post(id);
        if let Some(post) = self.peek(&single).and_then(|d| d.find_post(id)) {
            return Some(post.clone());
        }
        self.entries
            .iter()
            .find_map(|(_, entry)| entry.data.find_post(id))
            .cloned()
    }
}
