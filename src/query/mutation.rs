use super::cache::QueryData;
use super::client::QueryClient;
use super::key::{QueryKey, ResourceKind};
use super::transaction::OptimisticTransaction;
use crate::api::ApiError;
use crate::model::{
    normalize_tag_name, normalize_tags, AuthorType, Channel, ChannelCreate, ChannelUpdate, Feed,
    FeedCreate, FeedUpdate, Post, Tag, TagCreate, ALL_FEED_ID,
};
use std::future::Future;

/// Collections that may hold a copy of a post.
const POST_COLLECTIONS: [ResourceKind; 4] = [
    ResourceKind::Posts,
    ResourceKind::Post,
    ResourceKind::Search,
    ResourceKind::Bookmarks,
];

fn post_prefixes() -> Vec<QueryKey> {
    POST_COLLECTIONS.into_iter().map(QueryKey::prefix).collect()
}

impl QueryClient {
    // ========================================================================
    // Bookmarks
    // ========================================================================

    /// Bookmark a post. Every cached copy shows the bookmark immediately.
    pub async fn add_bookmark(&self, post_id: &str) -> Result<(), ApiError> {
        let tx = OptimisticTransaction::begin(self, post_prefixes());
        tx.apply(|_, data| data.patch_post(post_id, |p| p.is_bookmarked = true));

        let result = self.api.add_bookmark(post_id).await;
        self.settle(tx, result, "Added to bookmarks", "Failed to add bookmark")
    }

    /// Remove a bookmark. The post also disappears from cached bookmark pages.
    pub async fn remove_bookmark(&self, post_id: &str) -> Result<(), ApiError> {
        let tx = OptimisticTransaction::begin(self, post_prefixes());
        tx.apply(|key, data| {
            if key.kind() == Some(ResourceKind::Bookmarks) {
                data.remove_post(post_id, key.page_request())
            } else {
                data.patch_post(post_id, |p| p.is_bookmarked = false)
            }
        });

        let result = self.api.remove_bookmark(post_id).await;
        self.settle(tx, result, "Removed from bookmarks", "Failed to remove bookmark")
    }

    /// Flip the bookmark state of `post`.
    pub async fn toggle_bookmark(&self, post: &Post) -> Result<(), ApiError> {
        if post.is_bookmarked {
            self.remove_bookmark(&post.id).await
        } else {
            self.add_bookmark(&post.id).await
        }
    }

    // ========================================================================
    // Post tags
    // ========================================================================

    /// Replace the tags of a post.
    ///
    /// Names are normalized; tags the post already carries keep their
    /// author type, new ones are human-authored.
    pub async fn update_post_tags<S: AsRef<str>>(
        &self,
        post_id: &str,
        names: &[S],
    ) -> Result<Post, ApiError> {
        let names = normalize_tags(names);
        let current = self.cache().find_post(post_id);
        let tags: Vec<Tag> = names
            .iter()
            .map(|name| {
                current
                    .as_ref()
                    .and_then(|p| p.tags.iter().find(|t| &t.name == name))
                    .cloned()
                    .unwrap_or_else(|| Tag::human(name))
            })
            .collect();

        let tx = OptimisticTransaction::begin(self, post_prefixes());
        tx.apply(|_, data| data.patch_post(post_id, |p| p.tags = tags.clone()));

        match self.api.update_post_tags(post_id, &tags).await {
            Ok(post) => {
                tx.commit();
                self.set_data(QueryKey::post(post_id), QueryData::Post(post.clone()));
                self.invalidate(&QueryKey::prefix(ResourceKind::Tags));
                self.notify_success("Tags updated successfully");
                Ok(post)
            }
            Err(e) => {
                tracing::warn!(post_id = %post_id, error = %e, "Tag update failed");
                tx.rollback();
                self.notify_error("Failed to update tags");
                Err(e)
            }
        }
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    pub async fn create_feed<S: AsRef<str>>(
        &self,
        name: &str,
        tag_filters: &[S],
    ) -> Result<Feed, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.reject("Feed name cannot be empty"));
        }
        let body = FeedCreate {
            name: name.to_string(),
            tag_filters: normalize_tags(tag_filters),
        };
        self.run(
            self.api.create_feed(&body),
            &[ResourceKind::Feeds],
            "Feed created successfully",
            "Failed to create feed",
        )
        .await
    }

    pub async fn update_feed(&self, id: &str, update: FeedUpdate) -> Result<Feed, ApiError> {
        let id = self.feed_id(id)?;
        let name = match update.name {
            Some(name) if name.trim().is_empty() => {
                return Err(self.reject("Feed name cannot be empty"));
            }
            other => other.map(|n| n.trim().to_string()),
        };
        let body = FeedUpdate {
            name,
            tag_filters: update.tag_filters.map(|t| normalize_tags(t.as_slice())),
        };
        self.run(
            self.api.update_feed(id, &body),
            &[ResourceKind::Feeds],
            "Feed updated successfully",
            "Failed to update feed",
        )
        .await
    }

    /// Delete a feed. The reserved "all" feed is rejected without a request.
    pub async fn delete_feed(&self, id: &str) -> Result<(), ApiError> {
        let id = self.feed_id(id)?;
        if id == ALL_FEED_ID {
            return Err(self.reject("The \"all\" feed cannot be deleted"));
        }
        self.run(
            self.api.delete_feed(id),
            &[ResourceKind::Feeds],
            "Feed deleted successfully",
            "Failed to delete feed",
        )
        .await
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub async fn create_tag(&self, name: &str, author_type: AuthorType) -> Result<Tag, ApiError> {
        let name = normalize_tag_name(name);
        if name.is_empty() {
            return Err(self.reject("Tag name cannot be empty"));
        }
        let body = TagCreate { name, author_type };
        self.run(
            self.api.create_tag(&body),
            &[ResourceKind::Tags],
            "Tag created successfully",
            "Failed to create tag",
        )
        .await
    }

    /// Delete a tag everywhere. Cached posts lose it, so post collections
    /// are invalidated too.
    pub async fn delete_tag(&self, name: &str) -> Result<(), ApiError> {
        let name = normalize_tag_name(name);
        if name.is_empty() {
            return Err(self.reject("Tag name cannot be empty"));
        }
        let mut stale = vec![ResourceKind::Tags];
        stale.extend(POST_COLLECTIONS);
        self.run(
            self.api.delete_tag(&name),
            &stale,
            "Tag deleted successfully",
            "Failed to delete tag",
        )
        .await
    }

    // ========================================================================
    // Channels
    // ========================================================================

    pub async fn add_channel(&self, channel: ChannelCreate) -> Result<Channel, ApiError> {
        let username = self.channel_username(&channel.username)?;
        let body = ChannelCreate {
            username: username.to_string(),
            name: channel
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            is_active: channel.is_active,
        };
        self.run(
            self.api.add_channel(&body),
            &[ResourceKind::Channels],
            "Channel added successfully",
            "Failed to add channel",
        )
        .await
    }

    pub async fn update_channel(
        &self,
        username: &str,
        update: ChannelUpdate,
    ) -> Result<Channel, ApiError> {
        let username = self.channel_username(username)?;
        self.run(
            self.api.update_channel(username, &update),
            &[ResourceKind::Channels],
            "Channel updated successfully",
            "Failed to update channel",
        )
        .await
    }

    pub async fn remove_channel(&self, username: &str) -> Result<(), ApiError> {
        let username = self.channel_username(username)?;
        self.run(
            self.api.remove_channel(username),
            &[ResourceKind::Channels],
            "Channel removed successfully",
            "Failed to remove channel",
        )
        .await
    }

    // ========================================================================
    // Outcome handling
    // ========================================================================

    fn settle<T>(
        &self,
        tx: OptimisticTransaction,
        result: Result<T, ApiError>,
        success: &str,
        failure: &str,
    ) -> Result<T, ApiError> {
        match result {
            Ok(value) => {
                tx.commit();
                self.notify_success(success);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(error = %e, "{failure}");
                tx.rollback();
                self.notify_error(failure);
                Err(e)
            }
        }
    }

    /// Await a plain mutation, then mark `stale` collections for refetch.
    async fn run<T>(
        &self,
        request: impl Future<Output = Result<T, ApiError>>,
        stale: &[ResourceKind],
        success: &str,
        failure: &str,
    ) -> Result<T, ApiError> {
        match request.await {
            Ok(value) => {
                for kind in stale {
                    self.invalidate(&QueryKey::prefix(*kind));
                }
                self.notify_success(success);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(error = %e, "{failure}");
                self.notify_error(failure);
                Err(e)
            }
        }
    }

    /// Trimmed feed id. A blank id would address the collection itself.
    fn feed_id<'a>(&self, id: &'a str) -> Result<&'a str, ApiError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(self.reject("Feed id cannot be empty"));
        }
        Ok(id)
    }

    /// Channel username without surrounding whitespace or a leading `@`.
    fn channel_username<'a>(&self, username: &'a str) -> Result<&'a str, ApiError> {
        let username = username.trim().trim_start_matches('@').trim();
        if username.is_empty() {
            return Err(self.reject("Channel username cannot be empty"));
        }
        Ok(username)
    }

    fn reject(&self, reason: &str) -> ApiError {
        tracing::debug!(reason = %reason, "Rejected mutation");
        self.notify_error(reason);
        ApiError::Validation(reason.to_string())
    }

    fn notify_success(&self, message: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.success(message);
        }
    }

    fn notify_error(&self, message: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.error(message);
        }
    }
}
