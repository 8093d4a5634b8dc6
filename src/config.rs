//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub feed: FeedConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// Backend-as-a-service connection
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// API endpoint (e.g., "https://cloud.appwrite.io/v1")
    pub endpoint: String,
    /// Project id sent with every request
    pub project_id: String,
    /// Optional server API key
    pub api_key: Option<String>,
    /// Database holding the collections below
    pub database_id: String,
    /// Storage bucket for post and profile images
    pub storage_id: String,
    pub collections: CollectionsConfig,
}

impl BackendConfig {
    /// Endpoint without a trailing slash
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}

/// Collection ids
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionsConfig {
    pub users: String,
    pub posts: String,
    pub saves: String,
}

/// Query cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached query results (default: 1000)
    pub max_entries: u64,
    /// Seconds a fetched result counts as fresh (default: 30)
    pub stale_time_secs: u64,
    /// Seconds an unused result is kept before eviction (default: 300)
    pub gc_time_secs: u64,
}

impl CacheConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_time_secs)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_secs(self.gc_time_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            stale_time_secs: 30,
            gc_time_secs: 300,
        }
    }
}

/// Feed sizing
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Posts in the recent-posts list (default: 20)
    pub recent_limit: u32,
    /// Posts per page of the infinite feed (default: 9)
    pub page_size: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            recent_limit: 20,
            page_size: 9,
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "Snapgram/0.1.0".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (SNAPGRAM__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        Self::load_from(Path::new("config"))
    }

    /// Same as [`AppConfig::load`] with an explicit config directory
    pub fn load_from(dir: &Path) -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("backend.endpoint", "https://cloud.appwrite.io/v1")?
            .set_default("cache.max_entries", 1000)?
            .set_default("cache.stale_time_secs", 30)?
            .set_default("cache.gc_time_secs", 300)?
            .set_default("feed.recent_limit", 20)?
            .set_default("feed.page_size", 9)?
            .set_default("http.timeout_secs", 30)?
            .set_default("http.user_agent", "Snapgram/0.1.0")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::from(dir.join("default")).required(false))
            .add_source(File::from(dir.join("local")).required(false))
            .add_source(
                Environment::with_prefix("SNAPGRAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        let endpoint = url::Url::parse(&self.backend.endpoint).map_err(|e| {
            crate::error::AppError::Config(format!("backend.endpoint is not a valid URL: {e}"))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(crate::error::AppError::Config(
                "backend.endpoint must use http or https".to_string(),
            ));
        }

        let required = [
            ("backend.project_id", &self.backend.project_id),
            ("backend.database_id", &self.backend.database_id),
            ("backend.storage_id", &self.backend.storage_id),
            ("backend.collections.users", &self.backend.collections.users),
            ("backend.collections.posts", &self.backend.collections.posts),
            ("backend.collections.saves", &self.backend.collections.saves),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(crate::error::AppError::Config(format!(
                    "{name} must not be empty"
                )));
            }
        }

        if self.cache.max_entries == 0 {
            return Err(crate::error::AppError::Config(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }

        if self.feed.page_size == 0 {
            return Err(crate::error::AppError::Config(
                "feed.page_size must be greater than 0".to_string(),
            ));
        }

        if self.cache.gc_time_secs < self.cache.stale_time_secs {
            tracing::warn!(
                gc_time_secs = self.cache.gc_time_secs,
                stale_time_secs = self.cache.stale_time_secs,
                "Cached results will be evicted before they go stale"
            );
        }

        Ok(())
    }
}
