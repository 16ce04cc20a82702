use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::ConfigError;
use crate::feed::FeedSource;

pub const CONFIG_PATH_ENV: &str = "HOMEPAGE_CONFIG";

/// Bumping this invalidates every snapshot built by an older release.
pub const CACHE_VERSION: u32 = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feeds: FeedConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub sources: Vec<FeedSource>,
    pub refresh_interval_seconds: u64,
    pub request_timeout_seconds: u64,
    pub max_entries_per_source: usize,
    pub summary_max_chars: usize,
    /// Always the compiled-in `CACHE_VERSION`; never read from or written to disk.
    #[serde(skip, default = "current_cache_version")]
    pub cache_version: u32,
    pub user_agent: String,
    pub background_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub max_attempts: usize,
    pub sweep_after_seconds: u64,
    pub max_tracked_keys: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Take the client identity from `X-Forwarded-For` (behind a reverse proxy).
    pub trust_forwarded_for: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            refresh_interval_seconds: 900,
            request_timeout_seconds: 4,
            max_entries_per_source: 5,
            summary_max_chars: 160,
            cache_version: CACHE_VERSION,
            user_agent: "HomepageFeeds/1.0".to_owned(),
            background_refresh: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_attempts: 3,
            sweep_after_seconds: 300,
            max_tracked_keys: 10_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_owned(),
            trust_forwarded_for: false,
        }
    }
}

fn current_cache_version() -> u32 {
    CACHE_VERSION
}

fn default_sources() -> Vec<FeedSource> {
    vec![
        FeedSource::new("OpenAI", "https://openai.com/news/rss.xml", "O"),
        FeedSource::new("The Verge", "https://www.theverge.com/rss/index.xml", "V"),
        FeedSource::new("Hacker News", "https://news.ycombinator.com/rss", "Y")
            .with_low_info_summary("HN entry, click to read full article/discussion."),
        FeedSource::new("GitHub Blog", "https://github.blog/feed/", "G"),
    ]
}

impl FeedConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Upper bound for one whole refresh: sources are fetched concurrently,
    /// so one request timeout plus slack for parsing.
    pub fn refresh_deadline(&self) -> Duration {
        self.request_timeout() + Duration::from_secs(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_seconds == 0 {
            return Err(ConfigError::Invalid("feeds.refresh_interval_seconds must be > 0"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("feeds.request_timeout_seconds must be > 0"));
        }
        if self.max_entries_per_source == 0 {
            return Err(ConfigError::Invalid("feeds.max_entries_per_source must be > 0"));
        }
        if self.summary_max_chars == 0 {
            return Err(ConfigError::Invalid("feeds.summary_max_chars must be > 0"));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid("feed source names must not be blank"));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            let valid = Url::parse(&source.url)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidUrl {
                    source_name: source.name.clone(),
                    url: source.url.clone(),
                });
            }
        }
        Ok(())
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_seconds == 0 {
            return Err(ConfigError::Invalid("rate_limit.window_seconds must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("rate_limit.max_attempts must be > 0"));
        }
        if self.sweep_after_seconds < self.window_seconds {
            return Err(ConfigError::Invalid(
                "rate_limit.sweep_after_seconds must be >= window_seconds",
            ));
        }
        if self.max_tracked_keys == 0 {
            return Err(ConfigError::Invalid("rate_limit.max_tracked_keys must be > 0"));
        }
        Ok(())
    }
}

impl AppConfig {
    /// `$HOMEPAGE_CONFIG`, else `<config dir>/homepage/config.json`.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("homepage").join("config.json"))
    }

    /// Loads the configuration, falling back to (and writing out) defaults
    /// when the file is missing or unreadable.
    pub fn load() -> Self {
        let path = match Self::config_file_path() {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "no config path, using defaults");
                return Self::default();
            }
        };
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to load config, using defaults");
                let default_config = Self::default();
                if !path.exists() {
                    if let Err(save_err) = default_config.save_to(&path) {
                        warn!(error = %save_err, "failed to write default config");
                    }
                }
                default_config
            }
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let config_json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, config_json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.feeds.validate()?;
        self.rate_limit.validate()
    }
}
