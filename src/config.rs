use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::SourceConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub redis_url: Option<String>,

    #[serde(default = "default_redis_pool_size")]
    pub redis_pool_size: usize,

    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,

    /// TTL of the distributed tier, and the refresh interval.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_refresh_tiers")]
    pub refresh_tiers: Vec<u8>,

    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub backfill: BackfillSettings,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSettings {
    #[serde(default = "default_pages_per_run")]
    pub pages_per_run: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_secs: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("forum-ingest");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("forum-ingest.db").to_string_lossy().to_string()
}

fn default_redis_pool_size() -> usize {
    8
}

fn default_redis_timeout_ms() -> u64 {
    1000
}

fn default_cache_ttl() -> u64 {
    15 * 60
}

fn default_refresh_tiers() -> Vec<u8> {
    vec![1, 2]
}

fn default_lock_ttl() -> u64 {
    300
}

fn default_batch_size() -> usize {
    3
}

fn default_batch_delay_ms() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("forum-ingest/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_pages_per_run() -> u32 {
    3
}

fn default_page_delay_ms() -> u64 {
    5000
}

fn default_claim_ttl() -> u64 {
    600
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            pages_per_run: default_pages_per_run(),
            page_delay_ms: default_page_delay_ms(),
            claim_ttl_secs: default_claim_ttl(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            redis_url: None,
            redis_pool_size: default_redis_pool_size(),
            redis_timeout_ms: default_redis_timeout_ms(),
            cache_ttl_secs: default_cache_ttl(),
            refresh_tiers: default_refresh_tiers(),
            lock_ttl_secs: default_lock_ttl(),
            fetch: FetchSettings::default(),
            retry: RetrySettings::default(),
            backfill: BackfillSettings::default(),
            sources: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location (creating it on first run).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let config_path = Self::config_path();
                if config_path.exists() {
                    Self::from_file(&config_path)?
                } else {
                    let config = Config::default();
                    config.save()?;
                    config
                }
            }
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("FORUM_INGEST_DB") {
            self.db_path = db;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis_url = Some(url).filter(|u| !u.is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 {
            return Err(AppError::Config("cache_ttl_secs must be positive".into()));
        }
        if self.lock_ttl_secs == 0 {
            return Err(AppError::Config("lock_ttl_secs must be positive".into()));
        }
        if self.fetch.batch_size == 0 {
            return Err(AppError::Config("fetch.batch_size must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be positive".into()));
        }
        if self.backfill.pages_per_run == 0 {
            return Err(AppError::Config(
                "backfill.pages_per_run must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            url::Url::parse(&source.url).map_err(|e| {
                AppError::Config(format!("source '{}' has invalid url: {}", source.id, e))
            })?;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("forum-ingest")
            .join("config.toml")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_file_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/x.db"

            [[sources]]
            id = "gov"
            url = "https://gov.example.org"
            name = "Governance"
            tier = 1

            [[sources]]
            id = "misc"
            url = "https://misc.example.org"
            name = "Misc"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_ttl_secs, 900);
        assert_eq!(config.refresh_tiers, vec![1, 2]);
        assert_eq!(config.fetch.batch_size, 3);
        assert_eq!(config.backfill.pages_per_run, 3);
        assert_eq!(config.sources[1].tier, 3);
        assert!(config.redis_url.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_source_ids() {
        let mut config = Config::default();
        let source = SourceConfig {
            id: "a".into(),
            url: "https://a.example.org".into(),
            name: "A".into(),
            tier: 1,
        };
        config.sources = vec![source.clone(), source];
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn rejects_unparseable_source_url() {
        let mut config = Config::default();
        config.sources = vec![SourceConfig {
            id: "a".into(),
            url: "not a url".into(),
            name: "A".into(),
            tier: 1,
        }];
        assert!(config.validate().is_err());
    }
}
