//! Client library for the posts API: browse, filter, tag and bookmark posts
//! collected from external channels.
//!
//! - [`api`]: the [`PostsApi`](api::PostsApi) seam with HTTP and in-memory backends
//! - [`query`]: keyed query cache, fetch deduplication and optimistic mutations
//! - [`selection`]: the shared feed/tag selection and paging state
//! - [`search`]: debounced search input

pub mod api;
pub mod config;
pub mod model;
pub mod notify;
pub mod query;
pub mod search;
pub mod selection;
pub mod util;
