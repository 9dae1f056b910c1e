//! Utility functions for common operations.
//!
//! - **URL validation**: checks the configured API base URL
//! - **Text processing**: Unicode-aware truncation for command line listings

mod text;
mod url_validator;

pub use text::{display_width, single_line, truncate_to_width};
pub use url_validator::{validate_base_url, UrlValidationError};

/// Maximum allowed search query length, enforced before a search request is issued.
pub const MAX_SEARCH_QUERY_LENGTH: usize = 256;
