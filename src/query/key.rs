use crate::api::{PageRequest, PostQuery, SearchQuery};
use crate::model::DEFAULT_PAGE_SIZE;
use std::fmt;
use std::time::Duration;

/// Resource collections the cache knows about. The first segment of every
/// [`QueryKey`] names one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Posts,
    Post,
    Bookmarks,
    Search,
    Feeds,
    Tags,
    Channels,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Posts,
        ResourceKind::Post,
        ResourceKind::Bookmarks,
        ResourceKind::Search,
        ResourceKind::Feeds,
        ResourceKind::Tags,
        ResourceKind::Channels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Posts => "posts",
            ResourceKind::Post => "post",
            ResourceKind::Bookmarks => "bookmarks",
            ResourceKind::Search => "search",
            ResourceKind::Feeds => "feeds",
            ResourceKind::Tags => "tags",
            ResourceKind::Channels => "channels",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// How long fetched data counts as fresh. `None` means it never goes
    /// stale on its own and is only refetched after invalidation.
    pub fn stale_time(&self) -> Option<Duration> {
        match self {
            ResourceKind::Posts | ResourceKind::Post | ResourceKind::Bookmarks => {
                Some(Duration::ZERO)
            }
            ResourceKind::Search => Some(Duration::from_secs(30)),
            ResourceKind::Channels => Some(Duration::from_secs(5 * 60)),
            ResourceKind::Tags => Some(Duration::from_secs(10 * 60)),
            ResourceKind::Feeds => None,
        }
    }

    /// Whether failed fetches of this resource are retried. The post listing
    /// surfaces its errors immediately.
    pub fn retries_enabled(&self) -> bool {
        !matches!(self, ResourceKind::Posts)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key: the resource type followed by the exact request parameters.
///
/// Prefix matching compares whole segments, so `posts` matches
/// `posts/1/tags:rust` but `post` does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Key matching every entry of one resource collection.
    pub fn prefix(kind: ResourceKind) -> Self {
        Self(vec![kind.as_str().to_string()])
    }

    pub fn posts(query: &PostQuery) -> Self {
        let mut segments = vec![
            ResourceKind::Posts.as_str().to_string(),
            query.page.page.to_string(),
        ];
        push_limit(&mut segments, &query.page);
        if let Some(feed_id) = query.feed_id.as_deref().filter(|f| !f.is_empty()) {
            segments.push(format!("feed:{feed_id}"));
        }
        if let Some(tags) = query.tags.as_ref().filter(|t| !t.is_empty()) {
            segments.push(format!("tags:{}", tags.join(",")));
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            segments.push(format!("q:{search}"));
        }
        Self(segments)
    }

    pub fn post(id: &str) -> Self {
        Self::new([ResourceKind::Post.as_str(), id])
    }

    pub fn bookmarks(page: &PageRequest) -> Self {
        let mut segments = vec![
            ResourceKind::Bookmarks.as_str().to_string(),
            page.page.to_string(),
        ];
        push_limit(&mut segments, page);
        Self(segments)
    }

    pub fn search(query: &SearchQuery) -> Self {
        let mut segments = vec![
            ResourceKind::Search.as_str().to_string(),
            format!("q:{}", query.q),
            query.page.page.to_string(),
        ];
        push_limit(&mut segments, &query.page);
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Resource collection this key belongs to.
    pub fn kind(&self) -> Option<ResourceKind> {
        self.0.first().and_then(|s| ResourceKind::parse(s))
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Page a paginated key was built from.
    pub fn page_request(&self) -> Option<PageRequest> {
        let page_index = match self.kind()? {
            ResourceKind::Posts | ResourceKind::Bookmarks => 1,
            ResourceKind::Search => 2,
            _ => return None,
        };
        let page = self.0.get(page_index)?.parse().ok()?;
        let limit = match self.0.iter().find_map(|s| s.strip_prefix("limit:")) {
            Some(limit) => limit.parse().ok()?,
            None => DEFAULT_PAGE_SIZE,
        };
        Some(PageRequest::new(page, limit))
    }
}

/// The page size only becomes part of the key when it differs from the default.
fn push_limit(segments: &mut Vec<String>, page: &PageRequest) {
    if page.limit != DEFAULT_PAGE_SIZE {
        segments.push(format!("limit:{}", page.limit));
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl From<ResourceKind> for QueryKey {
    fn from(kind: ResourceKind) -> Self {
        Self::prefix(kind)
    }
}
