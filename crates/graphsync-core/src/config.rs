use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::limiter::ServiceClass;
use crate::retry::RetryBudget;
use crate::url_cache::{RefreshStrategy, UrlCacheOptions};

/// Retry budget parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per call (including the first).
    pub max_attempts: u32,
    /// Delay in seconds before the first retry (e.g. 0.5 = 500ms).
    pub min_backoff_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_backoff_secs: u64,
    /// Per-attempt timeout in seconds.
    pub per_call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let budget = RetryBudget::default();
        Self {
            max_attempts: budget.max_attempts,
            min_backoff_secs: budget.min_backoff.as_secs_f64(),
            max_backoff_secs: budget.max_backoff.as_secs(),
            per_call_timeout_secs: budget.per_call_timeout.as_secs(),
        }
    }
}

impl RetryConfig {
    /// Out-of-range `min_backoff_secs` (negative, NaN, too large for a
    /// `Duration`) is clamped into `[0, max_backoff]`.
    pub fn to_budget(&self) -> RetryBudget {
        let max_backoff = Duration::from_secs(self.max_backoff_secs);
        let min_backoff = Duration::try_from_secs_f64(self.min_backoff_secs.max(0.0))
            .unwrap_or(max_backoff)
            .min(max_backoff);
        RetryBudget {
            max_attempts: self.max_attempts.max(1),
            min_backoff,
            max_backoff,
            per_call_timeout: Duration::from_secs(self.per_call_timeout_secs.max(1)),
        }
    }
}

/// One static token pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Burst size in tokens.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

/// Adaptive pool settings; the ceiling is the class's static `refill_per_sec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingConfig {
    /// Lowest rate the pool may shrink to under throttling.
    pub floor_per_sec: f64,
    /// Consecutive successes needed before stepping the rate back up.
    pub recovery_successes: u32,
    /// Service classes that get a sliding pool.
    #[serde(default = "default_sliding_classes")]
    pub classes: Vec<ServiceClass>,
}

fn default_sliding_classes() -> Vec<ServiceClass> {
    vec![ServiceClass::Default]
}

impl Default for SlidingConfig {
    fn default() -> Self {
        Self {
            floor_per_sec: 2.0,
            recovery_successes: 10,
            classes: default_sliding_classes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Pool for mail/contacts/calendar and unclassified traffic.
    pub default: PoolConfig,
    /// Pool for file-library listing and delta traffic.
    pub bulk: PoolConfig,
    /// Adaptive pools. Omitting it inside an explicit `[limiter]` table disables them.
    #[serde(default)]
    pub sliding: Option<SlidingConfig>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default: PoolConfig {
                capacity: 200,
                refill_per_sec: 16.0,
            },
            bulk: PoolConfig {
                capacity: 300,
                refill_per_sec: 20.0,
            },
            sliding: Some(SlidingConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlCacheConfig {
    /// Seconds a completed refresh stays fresh (minimum 1).
    pub refresh_interval_secs: u64,
    /// "exclusive" (readers wait for a refresh) or "shadow" (readers use the old snapshot).
    #[serde(default)]
    pub strategy: RefreshStrategy,
    /// Optional `$top` for delta pages.
    #[serde(default)]
    pub page_size: Option<u32>,
}

impl Default for UrlCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 3600,
            strategy: RefreshStrategy::default(),
            page_size: None,
        }
    }
}

impl UrlCacheConfig {
    pub fn to_options(&self) -> UrlCacheOptions {
        let mut options = UrlCacheOptions::new(Duration::from_secs(self.refresh_interval_secs))
            .with_strategy(self.strategy);
        options.page.page_size = self.page_size;
        options
    }
}

/// Global configuration loaded from `~/.config/graphsync/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Optional retry budget; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub url_cache: UrlCacheConfig,
}

impl ConnectorConfig {
    pub fn retry_budget(&self) -> RetryBudget {
        self.retry
            .as_ref()
            .map_or_else(RetryBudget::default, RetryConfig::to_budget)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("graphsync")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from `path`.
pub fn load_from_path(path: &Path) -> Result<ConnectorConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: ConnectorConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ConnectorConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ConnectorConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from_path(&path)
}
