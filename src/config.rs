//! Configuration management for Quotamock.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{QuotaMockError, Result};
use crate::ratelimit::TimeUnit;

/// Prefix for environment overrides, e.g. `QUOTAMOCK__SERVER__HTTP_ADDR`.
const ENV_PREFIX: &str = "QUOTAMOCK";

/// Main configuration for the Quotamock service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaMockConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Management (metrics/health) address
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,

    /// Whether to serve the management listener at all
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            metrics_addr: default_metrics_addr(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_enabled() -> bool {
    true
}

/// Sizing for one counter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum live counters before eviction
    pub capacity: usize,
    /// Seconds after creation before a counter expires
    pub ttl_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default = "default_second_store")]
    pub second: StoreConfig,

    #[serde(default = "default_minute_store")]
    pub minute: StoreConfig,

    #[serde(default = "default_hour_store")]
    pub hour: StoreConfig,

    /// Group applied when a request names none
    #[serde(default = "default_group")]
    pub default_group: String,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            second: default_second_store(),
            minute: default_minute_store(),
            hour: default_hour_store(),
            default_group: default_group(),
        }
    }
}

fn default_second_store() -> StoreConfig {
    StoreConfig { capacity: 1000, ttl_secs: 10 }
}

fn default_minute_store() -> StoreConfig {
    StoreConfig { capacity: 1000, ttl_secs: 2 * 60 }
}

fn default_hour_store() -> StoreConfig {
    StoreConfig { capacity: 1000, ttl_secs: 2 * 60 * 60 }
}

fn default_group() -> String {
    crate::ratelimit::DEFAULT_GROUP.to_string()
}

impl RateLimitingConfig {
    /// Check store sizing against the window each store serves.
    pub fn validate(&self) -> Result<()> {
        for (unit, store) in [
            (TimeUnit::Second, &self.second),
            (TimeUnit::Minute, &self.minute),
            (TimeUnit::Hour, &self.hour),
        ] {
            if store.capacity == 0 {
                return Err(QuotaMockError::Config(format!(
                    "{unit:?} store capacity must be greater than zero"
                )));
            }
            if store.ttl_secs.saturating_mul(1000) < unit.millis() {
                return Err(QuotaMockError::Config(format!(
                    "{unit:?} store ttl of {}s is shorter than its window",
                    store.ttl_secs
                )));
            }
        }

        if self.default_group.is_empty() {
            return Err(QuotaMockError::Config("default_group must not be empty".to_string()));
        }

        Ok(())
    }
}

impl QuotaMockConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: QuotaMockConfig =
            serde_yaml::from_str(yaml).map_err(|e| QuotaMockError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file layered with
    /// `QUOTAMOCK__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml).required(true),
            );
        }

        let config: QuotaMockConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()
    }
}
