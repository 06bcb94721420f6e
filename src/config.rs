//! Configuration loading and management.
//!
//! Supports TOML configuration files with environment variable overrides.
//! Environment variables follow the pattern: `PUSHGATE_<SECTION>__<KEY>`,
//! for example `PUSHGATE_CORE__SYNC=true`.

use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::dispatch::PlatformToggles;
use crate::error::{Error, Result};
use crate::queue::QueueEngine;

/// Environment variable consulted for the token registry URL when the config
/// file leaves it unset.
pub const CLEANER_URL_ENV: &str = "CLEANER_API_URL";

/// Token registry used when neither config nor environment name one.
pub const DEFAULT_CLEANER_URL: &str = "https://cleaner.tolki.app";

const DEFAULT_QUEUE_NUM: i64 = 8192;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Dispatch core settings.
    pub core: CoreConfig,

    /// Queue engine selection.
    pub queue: QueueConfig,

    /// iOS (APNs) platform toggle.
    pub ios: PlatformConfig,

    /// Android (FCM) platform toggle.
    pub android: PlatformConfig,

    /// Huawei (HMS) platform toggle.
    pub huawei: PlatformConfig,

    /// HTTP API configuration.
    pub api: ApiConfig,

    /// Invalid token cleanup.
    pub reclaimer: ReclaimerConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Dispatch core settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Wait for deliveries before answering a push request.
    ///
    /// Only honored with the local queue engine.
    pub sync: bool,

    /// Maximum notifications accepted in a single push request.
    pub max_notification: usize,

    /// Number of local pool workers.
    pub worker_num: usize,

    /// Capacity of the local pool backlog.
    pub queue_num: usize,

    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,
}

/// Queue engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// `local` or `external`.
    pub engine: QueueEngine,

    /// Capacity of the external broker channel.
    pub external_capacity: usize,
}

/// Per-platform toggle.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub enabled: bool,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the API server.
    pub bind_address: String,
    pub push_uri: String,
    pub stat_app_uri: String,
    pub metric_uri: String,
    pub health_uri: String,
}

/// Token reclaimer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReclaimerConfig {
    /// Whether unregistered tokens are removed from the registry.
    pub enabled: bool,

    /// Registry base URL. Falls back to `CLEANER_API_URL`, then to
    /// [`DEFAULT_CLEANER_URL`].
    #[serde(default)]
    pub base_url: Option<String>,

    /// Total attempts per token, including the first.
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds.
    pub backoff_ms: u64,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,

    /// Log format: "json", "pretty", "compact" or "off".
    pub format: String,

    /// Mask device tokens in push logs.
    pub hide_token: bool,
}

fn default_worker_num() -> i64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i64)
        .unwrap_or(4)
}

impl AppConfig {
    /// Load configuration from a file path with environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::defaults()?
            .add_source(File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only (no config file).
    pub fn from_env() -> Result<Self> {
        let config = Self::defaults()?
            .add_source(Self::environment())
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            .set_default("core.sync", false)?
            .set_default("core.max_notification", 100)?
            .set_default("core.worker_num", default_worker_num())?
            .set_default("core.queue_num", DEFAULT_QUEUE_NUM)?
            .set_default("core.shutdown_timeout_secs", 10)?
            .set_default("queue.engine", "local")?
            .set_default("queue.external_capacity", DEFAULT_QUEUE_NUM)?
            .set_default("ios.enabled", true)?
            .set_default("android.enabled", true)?
            .set_default("huawei.enabled", false)?
            .set_default("api.bind_address", "0.0.0.0:8088")?
            .set_default("api.push_uri", "/api/push")?
            .set_default("api.stat_app_uri", "/api/stat/app")?
            .set_default("api.metric_uri", "/metrics")?
            .set_default("api.health_uri", "/healthz")?
            .set_default("reclaimer.enabled", true)?
            .set_default("reclaimer.max_attempts", 3)?
            .set_default("reclaimer.backoff_ms", 2000)?
            .set_default("reclaimer.timeout_secs", 10)?
            .set_default("log.level", "info")?
            .set_default("log.format", "compact")?
            .set_default("log.hide_token", true)?)
    }

    fn environment() -> Environment {
        Environment::with_prefix("PUSHGATE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn validate(&self) -> Result<()> {
        if self.core.worker_num == 0 {
            return Err(Error::InvalidConfig("core.worker_num must be positive".into()));
        }
        if self.core.queue_num == 0 {
            return Err(Error::InvalidConfig("core.queue_num must be positive".into()));
        }
        if self.core.max_notification == 0 {
            return Err(Error::InvalidConfig(
                "core.max_notification must be positive".into(),
            ));
        }
        if self.queue.external_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue.external_capacity must be positive".into(),
            ));
        }
        if self.reclaimer.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "reclaimer.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Platform switches consulted by the dispatch filter.
    #[must_use]
    pub fn platforms(&self) -> PlatformToggles {
        PlatformToggles {
            ios: self.ios.enabled,
            android: self.android.enabled,
            huawei: self.huawei.enabled,
        }
    }
}

impl CoreConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl ReclaimerConfig {
    /// Resolve the registry base URL: config, then environment, then default.
    #[must_use]
    pub fn resolve_base_url(&self) -> String {
        self.base_url
            .clone()
            .filter(|url| !url.is_empty())
            .or_else(|| std::env::var(CLEANER_URL_ENV).ok().filter(|url| !url.is_empty()))
            .unwrap_or_else(|| DEFAULT_CLEANER_URL.to_string())
    }

    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
