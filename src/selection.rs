//! Shared browsing selection: the active feed and the tag filter chips.
//!
//! One [`SelectionStore`] is created by the application and handed to every
//! view that reads or changes the selection. Views that page through posts
//! hold a [`PagedView`], which snaps back to the first page whenever the
//! selection changes.

use crate::api::{PageRequest, PostQuery};
use crate::model::{normalize_tag_name, normalize_tags, Feed, ALL_FEED_ID, DEFAULT_PAGE_SIZE};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub current_feed_id: String,
    pub selected_tags: Vec<String>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            current_feed_id: ALL_FEED_ID.to_string(),
            selected_tags: Vec::new(),
        }
    }
}

impl Selection {
    /// Tag filter in effect: the active feed's filters when it has any,
    /// otherwise the selected tags, otherwise no filter.
    pub fn effective_tags(&self, feeds: &[Feed]) -> Option<Vec<String>> {
        let feed_filters = feeds
            .iter()
            .find(|f| f.id == self.current_feed_id)
            .map(|f| &f.tag_filters)
            .filter(|filters| !filters.is_empty());

        match feed_filters {
            Some(filters) => Some(filters.clone()),
            None if !self.selected_tags.is_empty() => Some(self.selected_tags.clone()),
            None => None,
        }
    }

    /// Listing request for this selection.
    ///
    /// Filters of known feeds are resolved locally. A feed missing from
    /// `feeds` is passed by id so the server can resolve it.
    pub fn post_query(&self, feeds: &[Feed], page: PageRequest) -> PostQuery {
        let known = feeds.iter().any(|f| f.id == self.current_feed_id);
        let feed_id = (self.current_feed_id != ALL_FEED_ID && !known)
            .then(|| self.current_feed_id.clone());
        PostQuery {
            page,
            tags: self.effective_tags(feeds),
            feed_id,
            search: None,
        }
    }
}

/// Observable holder of the current [`Selection`].
///
/// Setting a value equal to the current one does not notify subscribers.
#[derive(Debug, Clone)]
pub struct SelectionStore {
    tx: Arc<watch::Sender<Selection>>,
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new(Selection::default())
    }
}

impl SelectionStore {
    pub fn new(initial: Selection) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Selection {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Selection> {
        self.tx.subscribe()
    }

    /// Returns true if the selection changed.
    pub fn set_current_feed(&self, feed_id: impl Into<String>) -> bool {
        let feed_id = feed_id.into();
        self.modify(|s| {
            if s.current_feed_id == feed_id {
                return false;
            }
            s.current_feed_id = feed_id;
            true
        })
    }

    /// Replace the selected tags. Names are normalized.
    pub fn set_selected_tags<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        let tags = normalize_tags(tags);
        self.modify(|s| {
            if s.selected_tags == tags {
                return false;
            }
            s.selected_tags = tags;
            true
        })
    }

    /// Add the tag if absent, remove it if present.
    pub fn toggle_tag(&self, name: &str) -> bool {
        let name = normalize_tag_name(name);
        if name.is_empty() {
            return false;
        }
        self.modify(|s| {
            match s.selected_tags.iter().position(|t| *t == name) {
                Some(index) => {
                    s.selected_tags.remove(index);
                }
                None => s.selected_tags.push(name),
            }
            true
        })
    }

    pub fn clear_tags(&self) -> bool {
        self.modify(|s| {
            if s.selected_tags.is_empty() {
                return false;
            }
            s.selected_tags.clear();
            true
        })
    }

    fn modify(&self, f: impl FnOnce(&mut Selection) -> bool) -> bool {
        let changed = self.tx.send_if_modified(f);
        if changed {
            let current = self.tx.borrow();
            tracing::debug!(
                feed = %current.current_feed_id,
                tags = ?current.selected_tags,
                "Selection changed"
            );
        }
        changed
    }
}

/// Page cursor of a view that lists posts for the shared selection.
#[derive(Debug)]
pub struct PagedView {
    selection: watch::Receiver<Selection>,
    page: u32,
    limit: u32,
}

impl PagedView {
    pub fn new(store: &SelectionStore) -> Self {
        Self::with_limit(store, DEFAULT_PAGE_SIZE)
    }

    pub fn with_limit(store: &SelectionStore, limit: u32) -> Self {
        Self {
            selection: store.subscribe(),
            page: 1,
            limit: limit.max(1),
        }
    }

    /// Current page, reset to 1 if the selection changed since last look.
    pub fn page(&mut self) -> u32 {
        self.sync();
        self.page
    }

    pub fn page_request(&mut self) -> PageRequest {
        PageRequest::new(self.page(), self.limit)
    }

    /// Current selection and page, reconciled.
    pub fn current(&mut self) -> (Selection, PageRequest) {
        let page = self.page_request();
        (self.selection.borrow().clone(), page)
    }

    pub fn next_page(&mut self) -> u32 {
        self.sync();
        self.page = self.page.saturating_add(1);
        self.page
    }

    pub fn prev_page(&mut self) -> u32 {
        self.sync();
        self.page = self.page.saturating_sub(1).max(1);
        self.page
    }

    pub fn set_page(&mut self, page: u32) {
        self.sync();
        self.page = page.max(1);
    }

    fn sync(&mut self) {
        // A closed channel means the store is gone; keep the current page.
        if self.selection.has_changed().unwrap_or(false) {
            self.selection.borrow_and_update();
            self.page = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(id: &str, filters: &[&str]) -> Feed {
        Feed {
            id: id.to_string(),
            name: format!("feed {id}"),
            tag_filters: filters.iter().map(|s| s.to_string()).collect(),
            created_at: None,
        }
    }

    fn feeds() -> Vec<Feed> {
        vec![
            feed(ALL_FEED_ID, &[]),
            feed("1", &["research-paper", "arxiv"]),
            feed("2", &["tutorial", "educational"]),
            feed("3", &[]),
        ]
    }

    #[test]
    fn test_feed_filters_win_over_selected_tags() {
        let selection = Selection {
            current_feed_id: "2".to_string(),
            selected_tags: vec!["rust".to_string()],
        };
        assert_eq!(
            selection.effective_tags(&feeds()),
            Some(vec!["tutorial".to_string(), "educational".to_string()])
        );
    }

    #[test]
    fn test_empty_feed_filters_mean_no_filter() {
        let mut selection = Selection {
            current_feed_id: "3".to_string(),
            selected_tags: Vec::new(),
        };
        assert_eq!(selection.effective_tags(&feeds()), None);

        selection.selected_tags = vec!["rust".to_string()];
        assert_eq!(
            selection.effective_tags(&feeds()),
            Some(vec!["rust".to_string()])
        );
    }

    #[test]
    fn test_unknown_feed_passed_by_id() {
        let selection = Selection {
            current_feed_id: "42".to_string(),
            selected_tags: Vec::new(),
        };
        let query = selection.post_query(&feeds(), PageRequest::default());
        assert_eq!(query.feed_id.as_deref(), Some("42"));
        assert_eq!(query.tags, None);

        let query = Selection::default().post_query(&feeds(), PageRequest::default());
        assert_eq!(query.feed_id, None);
    }

    #[test]
    fn test_equal_values_do_not_notify() {
        let store = SelectionStore::default();
        let rx = store.subscribe();

        assert!(!store.set_current_feed(ALL_FEED_ID));
        assert!(!store.set_selected_tags::<&str>(&[]));
        assert!(!store.clear_tags());
        assert!(!rx.has_changed().unwrap());

        assert!(store.set_selected_tags(&["Rust", "rust", " async "]));
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.snapshot().selected_tags, vec!["rust", "async"]);
        assert!(!store.set_selected_tags(&["rust", "async"]));
    }

    #[test]
    fn test_toggle_tag() {
        let store = SelectionStore::default();
        assert!(store.toggle_tag("LLM"));
        assert!(store.toggle_tag("news"));
        assert_eq!(store.snapshot().selected_tags, vec!["llm", "news"]);
        assert!(store.toggle_tag("llm"));
        assert_eq!(store.snapshot().selected_tags, vec!["news"]);
        assert!(!store.toggle_tag("  "));
    }

    #[test]
    fn test_selection_change_resets_page() {
        let store = SelectionStore::default();
        let mut view = PagedView::new(&store);

        assert_eq!(view.next_page(), 2);
        assert_eq!(view.next_page(), 3);
        assert_eq!(view.page(), 3);

        store.set_selected_tags(&["rust"]);
        assert_eq!(view.page(), 1);

        view.set_page(4);
        store.set_current_feed("2");
        let (selection, page) = view.current();
        assert_eq!(selection.current_feed_id, "2");
        assert_eq!(page.page, 1);
    }

    #[test]
    fn test_unchanged_selection_keeps_page() {
        let store = SelectionStore::default();
        let mut view = PagedView::with_limit(&store, 10);
        view.set_page(3);
        store.set_current_feed(ALL_FEED_ID);
        assert_eq!(view.page(), 3);
        assert_eq!(view.prev_page(), 2);
        assert_eq!(view.prev_page(), 1);
        assert_eq!(view.prev_page(), 1);
        assert_eq!(view.page_request().limit, 10);
    }
}
