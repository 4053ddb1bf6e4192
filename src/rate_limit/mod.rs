//! Rate Limiting Module
//!
//! Short-window, per-caller admission control in front of the answering
//! service. Callers are identified by a [`CallerKey`] (usually the client
//! address) and each may have at most `max_requests` admitted requests in
//! any trailing window of `window_ms`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            SlidingWindowLimiter              │
//! ├──────────────────────────────────────────────┤
//! │  DashMap<CallerKey, VecDeque<Instant>>       │
//! │   shard-level lock per key, lazy eviction    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! State is process-local and may be lost on restart.

pub mod config;
pub mod sliding_window;

#[cfg(test)]
mod proptests;

pub use config::RateLimitConfig;
pub use sliding_window::{CallerKey, RateLimitDecision, SlidingWindowLimiter};
