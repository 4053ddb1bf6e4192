//! Quotagate Library
//!
//! Admission gateway for a prompt-answering service. Every request passes a
//! per-caller sliding-window rate limit and a per-identity response quota
//! before it is forwarded, and is charged only when the answer comes back.

pub mod admission;
pub mod config;
pub mod downstream;
pub mod metrics;
pub mod metrics_server;
pub mod quota;
pub mod rate_limit;
pub mod server;
