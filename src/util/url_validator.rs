use thiserror::Error;
use url::Url;

/// Errors that can occur while validating the API base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL cannot carry path segments (e.g. `mailto:`).
    #[error("URL cannot be used as a base: {0}")]
    CannotBeABase(String),
    /// Query strings and fragments are not allowed in the base URL.
    #[error("Base URL must not contain a query or fragment")]
    QueryOrFragment,
}

/// Validates the base URL of the posts API.
///
/// The API usually runs next to the client during development, so localhost
/// and private addresses are accepted. Only
/// `http`/`https` bases with a plain path are allowed; a trailing slash is
/// stripped so endpoint paths can be appended segment by segment.
///
/// # Examples
///
/// ```
/// use postfeed::util::validate_base_url;
///
/// let url = validate_base_url("http://localhost:8000/api/").unwrap();
/// assert_eq!(url.as_str(), "http://localhost:8000/api");
///
/// assert!(validate_base_url("file:///etc/passwd").is_err());
/// assert!(validate_base_url("https://example.com/api?x=1").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.cannot_be_a_base() {
        return Err(UrlValidationError::CannotBeABase(url_str.to_owned()));
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(UrlValidationError::QueryOrFragment);
    }

    let trimmed = url.path().trim_end_matches('/').to_owned();
    url.set_path(&trimmed);

    Ok(url)
}
