//! Client-side data synchronization: keyed query cache, request
//! deduplication and optimistic mutations with rollback.
//!
//! Reads go through [`QueryClient`], which serves fresh cached data or
//! issues (and deduplicates) a fetch. Writes snapshot every cached
//! collection that could hold the affected entity, patch it immediately,
//! then either mark the collections stale on success or restore the
//! snapshots on failure.
mod cache;
mod client;
mod key;
mod mutation;
mod transaction;

pub use cache::{FetchStatus, QueryData, QueryState};
pub use client::{ClientOptions, QueryClient, QueryRequest, RetryPolicy};
pub use key::{QueryKey, ResourceKind};
pub use transaction::OptimisticTransaction;

use crate::api::ApiError;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by cached reads.
///
/// Cloneable so one failed fetch can be handed to every deduplicated caller.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error(transparent)]
    Api(Arc<ApiError>),
    #[error("Cached data under {0} has an unexpected shape")]
    UnexpectedData(QueryKey),
}

impl QueryError {
    /// The underlying API error, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            QueryError::Api(e) => Some(e),
            QueryError::UnexpectedData(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.api_error(), Some(ApiError::NotFound(_)))
    }
}

impl From<ApiError> for QueryError {
    fn from(e: ApiError) -> Self {
        QueryError::Api(Arc::new(e))
    }
}
