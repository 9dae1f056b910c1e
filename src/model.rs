//! Wire and cache types for posts, tags, feeds and channels.
//!
//! These mirror the JSON bodies of the posts API. Tag names are normalized
//! (trimmed, lowercased, deduplicated) on the client before they are sent or
//! applied to cached posts.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// Identifier of the built-in feed that shows every post. Never deletable.
pub const ALL_FEED_ID: &str = "all";

/// Default page size used by paginated listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

// ============================================================================
// Posts and Tags
// ============================================================================

/// Who attached a tag to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorType {
    Llm,
    Human,
}

impl std::fmt::Display for AuthorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorType::Llm => f.write_str("llm"),
            AuthorType::Human => f.write_str("human"),
        }
    }
}

/// A label attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub author_type: AuthorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Tag {
    /// A human-authored tag with a normalized name and no timestamp yet.
    pub fn human(name: &str) -> Self {
        Self {
            name: normalize_tag_name(name),
            author_type: AuthorType::Human,
            created_at: None,
        }
    }
}

/// A post ingested from a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub channel_name: String,
    pub channel_username: String,
    pub content: String,
    #[serde(default)]
    pub media_urls: Option<Vec<String>>,
    pub original_url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub is_bookmarked: bool,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Returns true if any of the post's tags is in `filters`.
    ///
    /// An empty filter list matches every post.
    pub fn matches_any_tag(&self, filters: &[String]) -> bool {
        filters.is_empty()
            || self
                .tags
                .iter()
                .any(|tag| filters.iter().any(|f| f == &tag.name))
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }
}

/// Aggregate listing entry returned by `GET /tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSummary {
    pub name: String,
    #[serde(alias = "usage_count")]
    pub count: u64,
    #[serde(alias = "author_type")]
    pub source: AuthorType,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    /// Slice `items` into a page starting at `offset`.
    pub fn from_slice(items: &[T], offset: usize, limit: usize) -> Self
    where
        T: Clone,
    {
        let data: Vec<T> = items.iter().skip(offset).take(limit).cloned().collect();
        Self {
            data,
            total: items.len() as u64,
            has_more: offset.saturating_add(limit) < items.len(),
        }
    }
}

// ============================================================================
// Feeds and Channels
// ============================================================================

/// A saved tag-filter view over the post collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tag_filters: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Feed {
    pub fn is_all(&self) -> bool {
        self.id == ALL_FEED_ID
    }

    /// The reserved "all" feed can never be removed.
    pub fn is_deletable(&self) -> bool {
        !self.is_all()
    }
}

/// A source channel posts are ingested from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub username: String,
    pub name: String,
    pub is_active: bool,
    #[serde(default)]
    pub channel_id: Option<i64>,
    #[serde(default)]
    pub latest_message_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The backend issues integer ids for feeds and channels while the reserved
/// feed uses a string id, so both forms are accepted.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Int(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Int(n) => n.to_string(),
    })
}

// ============================================================================
// Request Bodies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCreate {
    pub name: String,
    #[serde(default)]
    pub tag_filters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_filters: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCreate {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCreate {
    pub name: String,
    pub author_type: AuthorType,
}

/// Body of `PATCH /posts/{id}/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsUpdate {
    pub tags: Vec<TagRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub name: String,
    pub author_type: AuthorType,
}

impl From<&Tag> for TagRef {
    fn from(tag: &Tag) -> Self {
        Self {
            name: tag.name.clone(),
            author_type: tag.author_type,
        }
    }
}

// ============================================================================
// Tag Name Normalization
// ============================================================================

/// Trim and lowercase a tag name.
pub fn normalize_tag_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Normalize a list of tag names, dropping empties and later duplicates.
///
/// Order of first occurrence is preserved.
pub fn normalize_tags<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| normalize_tag_name(n.as_ref()))
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn post_with_tags(names: &[&str]) -> Post {
        Post {
            id: "p".to_string(),
            channel_name: "Channel".to_string(),
            channel_username: "channel".to_string(),
            content: "content".to_string(),
            media_urls: None,
            original_url: "https://t.me/channel/1".to_string(),
            published_at: Utc::now(),
            tags: names.iter().map(|n| Tag::human(n)).collect(),
            is_bookmarked: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_feed_filters_use_or_semantics() {
        let filters = vec!["tutorial".to_string(), "educational".to_string()];
        assert!(post_with_tags(&["tutorial"]).matches_any_tag(&filters));
        assert!(post_with_tags(&["educational"]).matches_any_tag(&filters));
        assert!(!post_with_tags(&["news"]).matches_any_tag(&filters));
    }

    #[test]
    fn test_empty_filters_match_everything() {
        assert!(post_with_tags(&[]).matches_any_tag(&[]));
        assert!(post_with_tags(&["news"]).matches_any_tag(&[]));
    }

    #[test]
    fn test_normalize_tags_dedupes_case_insensitively() {
        let tags = normalize_tags(&["  Rust ", "rust", "", "Async", "RUST"]);
        assert_eq!(tags, vec!["rust".to_string(), "async".to_string()]);
    }

    #[test]
    fn test_feed_id_accepts_integer() {
        let feed: Feed =
            serde_json::from_str(r#"{"id": 7, "name": "Research", "tag_filters": ["arxiv"]}"#)
                .unwrap();
        assert_eq!(feed.id, "7");
        assert!(feed.is_deletable());
    }

    #[test]
    fn test_all_feed_not_deletable() {
        let feed: Feed = serde_json::from_str(r#"{"id": "all", "name": "All Posts"}"#).unwrap();
        assert!(feed.is_all());
        assert!(!feed.is_deletable());
        assert!(feed.tag_filters.is_empty());
    }

    #[test]
    fn test_post_defaults_for_missing_fields() {
        let json = r#"{
            "id": "42",
            "channel_name": "ML Daily",
            "channel_username": "mldaily",
            "content": "hello",
            "original_url": "https://t.me/mldaily/42",
            "published_at": "2024-05-01T10:00:00Z",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        let post: Post = serde_json::from_str(json).unwrap();
        assert!(post.tags.is_empty());
        assert!(!post.is_bookmarked);
        assert!(post.media_urls.is_none());
    }

    #[test]
    fn test_page_from_slice() {
        let items: Vec<u32> = (0..5).collect();
        let page = PaginatedResponse::from_slice(&items, 2, 2);
        assert_eq!(page.data, vec![2, 3]);
        assert_eq!(page.total, 5);
        assert!(page.has_more);

        let last = PaginatedResponse::from_slice(&items, 4, 2);
        assert_eq!(last.data, vec![4]);
        assert!(!last.has_more);
    }

    proptest! {
        #[test]
        fn prop_normalized_tags_are_unique_and_lowercase(names in proptest::collection::vec("[ a-zA-Z]{0,8}", 0..12)) {
            let tags = normalize_tags(&names);
            let unique: HashSet<_> = tags.iter().collect();
            prop_assert_eq!(unique.len(), tags.len());
            for tag in &tags {
                prop_assert!(!tag.is_empty());
                prop_assert_eq!(tag, &tag.to_lowercase());
                prop_assert_eq!(tag.as_str(), tag.trim());
            }
        }
    }
}
