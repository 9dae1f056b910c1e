//! Configuration file parser for ~/.config/postfeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! After the file is read, `POSTFEED_API_URL` and `POSTFEED_USE_MOCK_DATA`
//! from the environment take precedence over it.
use crate::query::{ClientOptions, RetryPolicy};
use crate::util::validate_base_url;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `api_url`.
pub const ENV_API_URL: &str = "POSTFEED_API_URL";
/// Environment variable overriding `use_mock_data` (`true` or `1` enables it).
pub const ENV_USE_MOCK_DATA: &str = "POSTFEED_USE_MOCK_DATA";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid API URL '{url}': {reason}")]
    InvalidApiUrl { url: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level client configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the posts API, e.g. `http://localhost:8000/api`.
    pub api_url: String,

    /// Serve everything from the built-in sample backend instead of the network.
    pub use_mock_data: bool,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Posts per page.
    pub page_size: u32,

    /// Maximum number of cached queries.
    pub cache_capacity: usize,

    /// Retries for transient read failures (the post listing never retries).
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api".to_string(),
            use_mock_data: false,
            request_timeout_secs: 30,
            page_size: crate::model::DEFAULT_PAGE_SIZE,
            cache_capacity: 256,
            max_retries: 3,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "api_url",
        "use_mock_data",
        "request_timeout_secs",
        "page_size",
        "cache_capacity",
        "max_retries",
    ];

    /// Load configuration from a TOML file, then apply the process environment.
    ///
    /// Not validated; call [`validate`](Self::validate) once every override
    /// is in place.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a TOML file only.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), api_url = %config.api_url, "Loaded configuration");
        Ok(config)
    }

    /// Overlay environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            tracing::debug!(api_url = %url, "API URL taken from environment");
            self.api_url = url.trim().to_string();
        }
        if let Some(flag) = lookup(ENV_USE_MOCK_DATA) {
            self.use_mock_data = matches!(flag.trim(), "true" | "1");
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.use_mock_data {
            return Ok(());
        }
        validate_base_url(&self.api_url)
            .map(|_| ())
            .map_err(|e| ConfigError::InvalidApiUrl {
                url: self.api_url.clone(),
                reason: e.to_string(),
            })
    }

    /// Transport timeout; zero falls back to the default.
    pub fn request_timeout(&self) -> Duration {
        match self.request_timeout_secs {
            0 => Duration::from_secs(Self::default().request_timeout_secs),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            cache_capacity: self.cache_capacity,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("postfeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:8000/api");
        assert!(!config.use_mock_data);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.page_size, 20);
        assert_eq!(config.cache_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/postfeed_test_nonexistent_config.toml");
        let config = Config::load_file(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load_file(&path).unwrap(), Config::default());
        cleanup(&path);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("partial", "page_size = 50\n");
        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.cache_capacity, 256);
        assert_eq!(config.api_url, "http://localhost:8000/api");
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "full",
            r#"
api_url = "https://posts.example.com/api"
use_mock_data = true
request_timeout_secs = 10
page_size = 40
cache_capacity = 64
max_retries = 1
"#,
        );
        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.api_url, "https://posts.example.com/api");
        assert!(config.use_mock_data);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.page_size, 40);
        let options = config.client_options();
        assert_eq!(options.cache_capacity, 64);
        assert_eq!(options.retry.max_retries, 1);
        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "page_size = 10\ntheme = \"dark\"\n");
        assert_eq!(Config::load_file(&path).unwrap().page_size, 10);
        cleanup(&path);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let path = write_config("wrongtype", "page_size = \"many\"\n");
        assert!(Config::load_file(&path).is_err());
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        cleanup(&path);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        config.apply_env(env(&[
            (ENV_API_URL, " https://api.example.com/v1 "),
            (ENV_USE_MOCK_DATA, "1"),
        ]));
        assert_eq!(config.api_url, "https://api.example.com/v1");
        assert!(config.use_mock_data);

        config.apply_env(env(&[(ENV_USE_MOCK_DATA, "yes")]));
        assert!(!config.use_mock_data);
        // unset variables leave values alone
        assert_eq!(config.api_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_invalid_api_url_rejected() {
        let config = Config {
            api_url: "ftp://example.com".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidApiUrl { .. })
        ));

        let mock = Config {
            use_mock_data: true,
            ..config
        };
        assert!(mock.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
