use super::cache::{CacheEntry, QueryCache, QueryData};
use super::client::QueryClient;
use super::key::QueryKey;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Snapshot of every cached entry an optimistic update may touch.
///
/// Beginning a transaction cancels running fetches under its prefixes, so a
/// response requested before the mutation cannot overwrite the patch. The
/// transaction must be settled with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback); dropping it unsettled marks its prefixes
/// stale.
#[must_use = "an optimistic transaction must be committed or rolled back"]
pub struct OptimisticTransaction {
    cache: Arc<Mutex<QueryCache>>,
    prefixes: Vec<QueryKey>,
    snapshots: Option<Vec<(QueryKey, CacheEntry)>>,
}

impl OptimisticTransaction {
    pub fn begin(client: &QueryClient, prefixes: Vec<QueryKey>) -> Self {
        let snapshots = {
            let mut cache = client.cache();
            let cancelled: usize = prefixes.iter().map(|p| cache.cancel(p)).sum();
            let snapshots = cache.snapshot(&prefixes);
            tracing::debug!(
                entries = snapshots.len(),
                cancelled = cancelled,
                "Optimistic transaction started"
            );
            snapshots
        };
        Self {
            cache: Arc::clone(&client.cache),
            prefixes,
            snapshots: Some(snapshots),
        }
    }

    /// Keys captured by the snapshot.
    pub fn snapshot_keys(&self) -> Vec<QueryKey> {
        self.snapshots
            .iter()
            .flatten()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Patch every cached entry under the transaction's prefixes.
    /// `patch` returns true when it changed the entry.
    pub fn apply(&self, patch: impl FnMut(&QueryKey, &mut QueryData) -> bool) -> usize {
        let changed = self.lock().patch(&self.prefixes, patch);
        tracing::debug!(entries = changed, "Applied optimistic update");
        changed
    }

    /// Keep the optimistic state and mark the affected collections stale so
    /// they are reconciled with the server on next read.
    pub fn commit(mut self) {
        self.snapshots = None;
        self.invalidate_all();
        tracing::debug!("Optimistic transaction committed");
    }

    /// Restore every snapshot as one unit.
    pub fn rollback(mut self) {
        if let Some(snapshots) = self.snapshots.take() {
            let restored = snapshots.len();
            self.lock().restore(&self.prefixes, snapshots);
            tracing::debug!(entries = restored, "Optimistic transaction rolled back");
        }
    }

    fn invalidate_all(&self) {
        let mut cache = self.lock();
        for prefix in &self.prefixes {
            cache.invalidate(prefix);
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueryCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for OptimisticTransaction {
    fn drop(&mut self) {
        if self.snapshots.take().is_some() {
            tracing::debug!("Unsettled optimistic transaction dropped");
            self.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockApi, PostQuery};
    use crate::query::{ClientOptions, QueryRequest, ResourceKind};
    use pretty_assertions::assert_eq;

    async fn warm_client() -> QueryClient {
        let client = QueryClient::new(
            Arc::new(MockApi::with_sample_data()),
            ClientOptions::default(),
        );
        client.posts(&PostQuery::default()).await.unwrap();
        client.post("1").await.unwrap();
        client
    }

    fn content_prefixes() -> Vec<QueryKey> {
        vec![
            QueryKey::prefix(ResourceKind::Posts),
            QueryKey::prefix(ResourceKind::Post),
        ]
    }

    #[tokio::test]
    async fn test_rollback_restores_exact_contents() {
        let client = warm_client().await;
        let listing = QueryRequest::Posts(PostQuery::default()).key();
        let before = client.peek(&listing);

        let tx = OptimisticTransaction::begin(&client, content_prefixes());
        assert_eq!(tx.snapshot_keys().len(), 2);
        let changed = tx.apply(|_, data| data.patch_post("1", |p| p.is_bookmarked = true));
        assert_eq!(changed, 2);
        assert_ne!(client.peek(&listing), before);

        tx.rollback();
        assert_eq!(client.peek(&listing), before);
    }

    #[tokio::test]
    async fn test_commit_marks_prefixes_stale() {
        let client = warm_client().await;
        client.feeds().await.unwrap();

        let tx = OptimisticTransaction::begin(&client, content_prefixes());
        tx.apply(|_, data| data.patch_post("1", |p| p.is_bookmarked = true));
        tx.commit();

        let state = client.state(&QueryKey::post("1"));
        assert!(state.is_stale);
        assert!(state.data.unwrap().find_post("1").unwrap().is_bookmarked);
        assert!(!client.state(&QueryKey::prefix(ResourceKind::Feeds)).is_stale);
    }

    #[tokio::test]
    async fn test_drop_without_settling_invalidates() {
        let client = warm_client().await;
        client.feeds().await.unwrap();
        {
            let _tx = OptimisticTransaction::begin(
                &client,
                vec![QueryKey::prefix(ResourceKind::Feeds)],
            );
        }
        assert!(client.state(&QueryKey::prefix(ResourceKind::Feeds)).is_stale);
    }
}
