//! Application configuration.

use crate::error::{AppError, AppResult};
use mdrelay_cache::CacheConfig;
use mdrelay_pull::PullConfig;
use mdrelay_router::RouterConfig;
use mdrelay_telemetry::EventLogConfig;
use mdrelay_ws::{ChannelConfig, WsFeedConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "MDRELAY_CONFIG";

/// Push feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// WebSocket URL. Default: ws://127.0.0.1:8080/ws.
    #[serde(default = "default_push_url")]
    pub url: String,
    /// Idle time before a ping is sent (ms). Default: 45000.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this (ms). Default: 10000.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_push_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    45_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: default_push_url(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl From<PushConfig> for WsFeedConfig {
    fn from(cfg: PushConfig) -> Self {
        let mut ws = WsFeedConfig::new(cfg.url);
        ws.heartbeat_interval_ms = cfg.heartbeat_interval_ms;
        ws.heartbeat_timeout_ms = cfg.heartbeat_timeout_ms;
        ws
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset. Default: "info,mdrelay=debug".
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Interval of the stats line printed by the binary (s). Default: 60.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_log_filter() -> String {
    mdrelay_telemetry::logging::DEFAULT_FILTER.to_string()
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Name of the push channel, used in logs and metric labels. Default: "push".
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    /// Timeout for a push snapshot wait or a pull fetch (ms). Default: 5000.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

fn default_channel_name() -> String {
    "push".to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            channel_name: default_channel_name(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            cache: CacheConfig::default(),
            event_log: EventLogConfig::default(),
            channel: ChannelConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Top-level configuration, one TOML section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Keys subscribed at start-up.
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub pull: PullConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            channel_name: default_channel_name(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            channel_name: cfg.coordinator.channel_name.clone(),
            fetch_timeout_ms: cfg.coordinator.fetch_timeout_ms,
            cache: cfg.cache.clone(),
            event_log: cfg.event_log.clone(),
            channel: cfg.channel.clone(),
            router: cfg.router.clone(),
        }
    }
}

impl AppConfig {
    /// Config file to use: the explicit path, else `MDRELAY_CONFIG`, else
    /// `config/default.toml` if it exists.
    pub fn resolve_path(explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .or_else(|| {
                Path::new(DEFAULT_CONFIG_PATH)
                    .exists()
                    .then(|| DEFAULT_CONFIG_PATH.to_string())
            })
    }

    /// Load the file chosen by [`resolve_path`](Self::resolve_path), or the
    /// built-in defaults when there is none.
    pub fn load(explicit: Option<&str>) -> AppResult<Self> {
        match Self::resolve_path(explicit) {
            Some(path) => Self::from_file(&path),
            None => {
                warn!(
                    path = DEFAULT_CONFIG_PATH,
                    "Config file not found, using built-in defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(Path::new(path))
            .map_err(|e| AppError::Config(format!("Failed to read {path}: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| AppError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components would refuse at construction.
    pub fn validate(&self) -> AppResult<()> {
        self.cache
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        if self.event_log.capacity == 0 {
            return Err(AppError::Config(
                "event_log.capacity must be at least 1".to_string(),
            ));
        }
        if self.router.failure_threshold == 0 {
            return Err(AppError::Config(
                "router.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.coordinator.fetch_timeout_ms == 0 {
            return Err(AppError::Config(
                "coordinator.fetch_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::from(self)
    }
}
