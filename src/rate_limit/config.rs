//! Rate Limit Configuration
//!
//! Configuration for the per-caller sliding window limiter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default rate limits
pub const DEFAULT_MAX_REQUESTS: u32 = 20; // requests per window
pub const DEFAULT_WINDOW_MS: u64 = 60_000; // one minute
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Maximum admitted requests per caller within one window
    pub max_requests: u32,

    /// Window length in milliseconds
    pub window_ms: u64,

    /// How often idle caller windows are swept, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl RateLimitConfig {
    /// Create a configuration with explicit limits
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Apply `QUOTAGATE_RATE_LIMIT_*` environment overrides.
    ///
    /// Values that fail to parse, or would disable the window, are ignored.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("QUOTAGATE_RATE_LIMIT_ENABLED") {
            self.enabled = val.parse().unwrap_or(self.enabled);
        }

        if let Ok(val) = std::env::var("QUOTAGATE_RATE_LIMIT_MAX_REQUESTS") {
            if let Ok(limit) = val.parse::<u32>() {
                if limit > 0 {
                    self.max_requests = limit;
                }
            }
        }

        if let Ok(val) = std::env::var("QUOTAGATE_RATE_LIMIT_WINDOW_MS") {
            if let Ok(window) = val.parse::<u64>() {
                if window > 0 {
                    self.window_ms = window;
                }
            }
        }

        self
    }

    /// Get window duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Get sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Disable rate limiting (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
