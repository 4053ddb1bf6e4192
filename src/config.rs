// Configuration File Support
//
// TOML configuration for the gateway with environment variable overrides.
// The file is read from --config, then $QUOTAGATE_CONFIG, then ./quotagate.toml.
// A missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::quota::QuotaConfig;
use crate::rate_limit::RateLimitConfig;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "quotagate.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Per-caller rate limiting
    pub rate_limit: RateLimitConfig,

    /// Per-identity quota
    pub quota: QuotaConfig,

    /// Answering service
    pub downstream: DownstreamConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the gateway listens on
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Answering service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Endpoint prompts are POSTed to
    pub url: String,

    /// Shared secret sent with every call. Never written back out.
    #[serde(skip_serializing)]
    pub secret: String,

    /// Deadline for one call, in seconds
    pub timeout_secs: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/ask".to_string(),
            secret: String::new(),
            timeout_secs: 60,
        }
    }
}

impl DownstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve /metrics on a dedicated port
    pub enabled: bool,

    /// Port for metrics server
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, the defaults (with environment
    /// overrides) are returned.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        std::env::var("QUOTAGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - QUOTAGATE_BIND
    /// - QUOTAGATE_LOG_LEVEL / QUOTAGATE_LOG_FORMAT
    /// - QUOTAGATE_RATE_LIMIT_ENABLED / _MAX_REQUESTS / _WINDOW_MS
    /// - QUOTAGATE_QUOTA_CEILING
    /// - QUOTAGATE_DOWNSTREAM_URL / QUOTAGATE_DOWNSTREAM_TIMEOUT_SECS
    /// - QUOTAGATE_DOWNSTREAM_SECRET (falls back to API_SECRET)
    /// - QUOTAGATE_METRICS_ENABLED / QUOTAGATE_METRICS_PORT
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("QUOTAGATE_BIND") {
            self.server.bind = bind;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("QUOTAGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("QUOTAGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        self.rate_limit = self.rate_limit.apply_env_overrides();
        self.quota = self.quota.apply_env_overrides();

        // Downstream overrides
        if let Ok(url) = std::env::var("QUOTAGATE_DOWNSTREAM_URL") {
            self.downstream.url = url;
        }
        if let Ok(timeout) = std::env::var("QUOTAGATE_DOWNSTREAM_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.downstream.timeout_secs = timeout;
                }
            }
        }
        if let Ok(secret) =
            std::env::var("QUOTAGATE_DOWNSTREAM_SECRET").or_else(|_| std::env::var("API_SECRET"))
        {
            self.downstream.secret = secret;
        }

        // Metrics overrides
        if let Ok(enabled) = std::env::var("QUOTAGATE_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Ok(port) = std::env::var("QUOTAGATE_METRICS_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.metrics.port = port;
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.rate_limit.max_requests == 0 {
            anyhow::bail!("Rate limit max_requests must be > 0");
        }
        if self.rate_limit.window_ms == 0 {
            anyhow::bail!("Rate limit window_ms must be > 0");
        }

        if self.quota.ceiling == 0 {
            anyhow::bail!("Quota ceiling must be > 0");
        }

        if self.downstream.url.trim().is_empty() {
            anyhow::bail!("Downstream URL must not be empty");
        }
        if self.downstream.timeout_secs == 0 {
            anyhow::bail!("Downstream timeout must be > 0");
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }

        Ok(())
    }

    /// Parsed listener address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Effective configuration as TOML, without the downstream secret
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}
