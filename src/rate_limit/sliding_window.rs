//! Sliding Window Limiter
//!
//! Per-caller rate limiting over a rolling window. Each caller key owns a
//! queue of the instants at which its requests were admitted; entries that
//! have aged out of the window are evicted lazily on the next access for
//! that key, so the queue never holds more than `max_requests` entries.
//!
//! The window is the closed-open interval `(now - window, now]`: a timestamp
//! exactly `window` old is already outside it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::IntGauge;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::config::RateLimitConfig;
use crate::metrics;

/// Identifier used to scope rate limiting (peer address, session token, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerKey(String);

impl CallerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallerKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<IpAddr> for CallerKey {
    fn from(addr: IpAddr) -> Self {
        Self(addr.to_string())
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,

    /// Slots left in the caller's window after this decision
    pub remaining: u32,

    /// Time until the oldest admitted request leaves the window (if denied)
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }
}

/// Sliding window rate limiter keyed by [`CallerKey`].
///
/// Cloning is cheap and shares state. Decisions for one key are made while
/// holding that key's map shard, so two concurrent requests from the same
/// caller can never both take the last slot; unrelated callers on other
/// shards proceed in parallel.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    inner: Arc<LimiterInner>,
}

#[derive(Debug)]
struct LimiterInner {
    enabled: bool,
    max_requests: u32,
    window: Duration,
    windows: DashMap<CallerKey, VecDeque<Instant>>,
    tracked: IntGauge,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_requests` per `window` for each caller
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::build(true, max_requests, window)
    }

    /// Create a limiter from configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::build(config.enabled, config.max_requests, config.window())
    }

    /// Create a limiter that admits everything (for testing)
    pub fn disabled() -> Self {
        Self::from_config(&RateLimitConfig::disabled())
    }

    fn build(enabled: bool, max_requests: u32, window: Duration) -> Self {
        Self::with_gauge(
            enabled,
            max_requests,
            window,
            metrics::RATE_LIMITER_TRACKED_KEYS.clone(),
        )
    }

    fn with_gauge(enabled: bool, max_requests: u32, window: Duration, tracked: IntGauge) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                enabled,
                max_requests,
                window,
                windows: DashMap::new(),
                tracked,
            }),
        }
    }

    /// Admit or deny one request from `key` at `now`.
    ///
    /// Only admitted requests are recorded in the window.
    pub fn admit(&self, key: &CallerKey, now: Instant) -> bool {
        self.check(key, now).allowed
    }

    /// Same as [`admit`](Self::admit), reporting remaining capacity and
    /// retry delay alongside the verdict.
    pub fn check(&self, key: &CallerKey, now: Instant) -> RateLimitDecision {
        let inner = &self.inner;
        if !inner.enabled {
            return RateLimitDecision::allowed(u32::MAX);
        }
        if inner.max_requests == 0 {
            return RateLimitDecision::denied(inner.window);
        }

        let mut timestamps = match inner.windows.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                inner.tracked.inc();
                entry.insert(VecDeque::new())
            }
        };

        // Callers racing for the shard may arrive with slightly older instants;
        // never record time going backwards.
        let now = timestamps.back().map_or(now, |last| now.max(*last));
        evict_expired(&mut timestamps, now, inner.window);

        let count = timestamps.len() as u32;
        if count < inner.max_requests {
            timestamps.push_back(now);
            RateLimitDecision::allowed(inner.max_requests - count - 1)
        } else {
            let oldest = timestamps.front().copied().unwrap_or(now);
            let retry_after = inner.window.saturating_sub(now.saturating_duration_since(oldest));
            debug!(caller = %key, count, "Rate limit exceeded");
            RateLimitDecision::denied(retry_after)
        }
    }

    /// Drop callers whose windows have fully expired at `now`.
    ///
    /// Returns the number of keys removed. An absent key behaves exactly
    /// like an empty window, so this never changes a future decision.
    pub fn sweep(&self, now: Instant) -> usize {
        let window = self.inner.window;
        let before = self.inner.windows.len();
        self.inner.windows.retain(|_, timestamps| {
            evict_expired(timestamps, now, window);
            !timestamps.is_empty()
        });
        let tracked = self.inner.windows.len();
        self.inner.tracked.set(tracked as i64);
        before.saturating_sub(tracked)
    }

    /// Forget a caller's window
    pub fn reset(&self, key: &CallerKey) {
        if self.inner.windows.remove(key).is_some() {
            self.inner.tracked.dec();
        }
    }

    /// Number of caller keys currently holding state
    pub fn tracked_keys(&self) -> usize {
        self.inner.windows.len()
    }

    /// Admissions currently recorded for `key` (without evicting)
    pub fn recorded(&self, key: &CallerKey) -> usize {
        self.inner.windows.get(key).map_or(0, |w| w.len())
    }

    pub fn max_requests(&self) -> u32 {
        self.inner.max_requests
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }
}

/// Remove timestamps that are `window` or more older than `now`.
fn evict_expired(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = timestamps.front() {
        if now.saturating_duration_since(*front) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
