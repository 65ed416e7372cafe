//! Configuration management for relaycast
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Every section has defaults, so a file only needs
//! the values it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channels::GatewayConfig;
use crate::scheduler::{DistributionConfig, DEFAULT_DAILY_CAP};
use crate::storage::MAX_CADENCE_MINUTES;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// State document configuration
    pub store: StoreConfig,

    /// Control surface configuration
    pub control: ControlConfig,

    /// Distribution loop configuration
    pub distribution: DistributionSettings,

    /// Messaging bridge configuration
    pub gateway: GatewayConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// State document configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON state document
    pub path: PathBuf,
}

/// Control surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Admin that can never be locked out
    pub bootstrap_admin: i64,

    /// How long `!restore` waits for the uploaded document
    pub import_timeout_secs: u64,

    /// Queued requests before the HTTP endpoint applies backpressure
    pub mailbox_capacity: usize,
}

/// Distribution loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionSettings {
    /// Maximum items fetched per cycle
    pub fetch_limit: usize,

    pub empty_pool_backoff_secs: u64,

    pub recovery_backoff_secs: u64,

    /// Pause between deliveries, lower bound
    pub delivery_delay_min_secs: u64,

    /// Pause between deliveries, upper bound
    pub delivery_delay_max_secs: u64,

    /// Daily cap for destinations without an override
    pub default_daily_cap: u32,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,

    pub port: u16,

    /// How long `POST /control` waits for the first reply
    pub reply_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/state.json"),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bootstrap_admin: 0,
            import_timeout_secs: 120,
            mailbox_capacity: 64,
        }
    }
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            fetch_limit: 20,
            empty_pool_backoff_secs: 60,
            recovery_backoff_secs: 30,
            delivery_delay_min_secs: 10,
            delivery_delay_max_secs: 20,
            default_daily_cap: DEFAULT_DAILY_CAP,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 10000,
            reply_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load from `path` when given, otherwise from the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bootstrap_admin = match std::env::var("RELAYCAST_BOOTSTRAP_ADMIN") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("RELAYCAST_BOOTSTRAP_ADMIN is not an id: {raw}"))?,
            Err(_) => defaults.control.bootstrap_admin,
        };

        let store = StoreConfig {
            path: std::env::var("RELAYCAST_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store.path),
        };

        let control = ControlConfig {
            bootstrap_admin,
            import_timeout_secs: env_parse("RELAYCAST_IMPORT_TIMEOUT")
                .unwrap_or(defaults.control.import_timeout_secs),
            mailbox_capacity: env_parse("RELAYCAST_MAILBOX_CAPACITY")
                .unwrap_or(defaults.control.mailbox_capacity),
        };

        let d = defaults.distribution;
        let distribution = DistributionSettings {
            fetch_limit: env_parse("RELAYCAST_FETCH_LIMIT").unwrap_or(d.fetch_limit),
            empty_pool_backoff_secs: env_parse("RELAYCAST_EMPTY_POOL_BACKOFF")
                .unwrap_or(d.empty_pool_backoff_secs),
            recovery_backoff_secs: env_parse("RELAYCAST_RECOVERY_BACKOFF")
                .unwrap_or(d.recovery_backoff_secs),
            delivery_delay_min_secs: env_parse("RELAYCAST_DELIVERY_DELAY_MIN")
                .unwrap_or(d.delivery_delay_min_secs),
            delivery_delay_max_secs: env_parse("RELAYCAST_DELIVERY_DELAY_MAX")
                .unwrap_or(d.delivery_delay_max_secs),
            default_daily_cap: env_parse("RELAYCAST_DEFAULT_DAILY_CAP")
                .unwrap_or(d.default_daily_cap),
        };

        let gateway = GatewayConfig {
            url: std::env::var("RELAYCAST_GATEWAY_URL").unwrap_or(defaults.gateway.url),
            auth_token: std::env::var("RELAYCAST_GATEWAY_TOKEN").ok(),
            timeout_secs: env_parse("RELAYCAST_GATEWAY_TIMEOUT")
                .unwrap_or(defaults.gateway.timeout_secs),
            requests_per_second: env_parse("RELAYCAST_GATEWAY_RPS")
                .unwrap_or(defaults.gateway.requests_per_second),
        };

        let server = ServerConfig {
            host: std::env::var("RELAYCAST_HOST").unwrap_or(defaults.server.host),
            port: env_parse("PORT").unwrap_or(defaults.server.port),
            reply_timeout_secs: env_parse("RELAYCAST_REPLY_TIMEOUT")
                .unwrap_or(defaults.server.reply_timeout_secs),
        };

        let logging = LoggingConfig {
            level: std::env::var("RELAYCAST_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("RELAYCAST_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            store,
            control,
            distribution,
            gateway,
            server,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.control.bootstrap_admin == 0 {
            anyhow::bail!("control.bootstrap_admin must be set (RELAYCAST_BOOTSTRAP_ADMIN)");
        }

        if self.control.import_timeout_secs == 0 {
            anyhow::bail!("control.import_timeout_secs must be greater than 0");
        }

        if self.distribution.fetch_limit == 0 {
            anyhow::bail!("distribution.fetch_limit must be greater than 0");
        }

        if self.distribution.default_daily_cap == 0 {
            anyhow::bail!("distribution.default_daily_cap must be greater than 0");
        }

        if self.distribution.delivery_delay_min_secs > self.distribution.delivery_delay_max_secs {
            anyhow::bail!("distribution.delivery_delay_min_secs must not exceed delivery_delay_max_secs");
        }

        if self.distribution.empty_pool_backoff_secs > u64::from(MAX_CADENCE_MINUTES) * 60 {
            anyhow::bail!("distribution.empty_pool_backoff_secs is unreasonably large");
        }

        self.gateway
            .validate()
            .map_err(|e| anyhow::anyhow!("gateway: {e}"))?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Distribution loop tunables
    #[must_use]
    pub fn distribution_config(&self) -> DistributionConfig {
        let d = &self.distribution;
        DistributionConfig {
            fetch_limit: d.fetch_limit,
            empty_pool_backoff: Duration::from_secs(d.empty_pool_backoff_secs),
            recovery_backoff: Duration::from_secs(d.recovery_backoff_secs),
            delivery_delay_min: Duration::from_secs(d.delivery_delay_min_secs),
            delivery_delay_max: Duration::from_secs(d.delivery_delay_max_secs),
            default_daily_cap: d.default_daily_cap,
        }
    }

    #[must_use]
    pub fn import_timeout(&self) -> Duration {
        Duration::from_secs(self.control.import_timeout_secs)
    }

    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.server.reply_timeout_secs)
    }

    /// Socket address string for the HTTP server
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
