//! Quota Configuration
//!
//! Ceiling applied to identities that use the shared downstream credential.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default lifetime ceiling of successful responses per identity
pub const DEFAULT_QUOTA_CEILING: u64 = 50;

/// Quota configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Successful responses allowed per identity. There is no periodic
    /// reset; usage only goes down through a manual ledger reset.
    pub ceiling: u64,

    /// Per-identity ceiling overrides, keyed by identity
    pub overrides: HashMap<String, u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_QUOTA_CEILING,
            overrides: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    /// Create a configuration with a single shared ceiling
    pub fn with_ceiling(ceiling: u64) -> Self {
        Self {
            ceiling,
            ..Self::default()
        }
    }

    /// Raise or lower the ceiling for one identity
    pub fn with_override(mut self, identity: impl Into<String>, ceiling: u64) -> Self {
        self.overrides.insert(identity.into(), ceiling);
        self
    }

    /// Effective ceiling for an identity
    pub fn ceiling_for(&self, identity: &str) -> u64 {
        self.overrides.get(identity).copied().unwrap_or(self.ceiling)
    }

    /// Apply `QUOTAGATE_QUOTA_*` environment overrides
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("QUOTAGATE_QUOTA_CEILING") {
            if let Ok(ceiling) = val.parse::<u64>() {
                if ceiling > 0 {
                    self.ceiling = ceiling;
                }
            }
        }
        self
    }
}
