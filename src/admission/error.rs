//! Admission Error Types
//!
//! Every way a request can stop short of a forwarded answer. Rate limiting
//! and quota exhaustion are expected outcomes; the other two are faults.

use std::time::Duration;

use crate::downstream::DownstreamError;
use crate::quota::LedgerError;

/// Error types for the admission pipeline
#[derive(Debug, Clone, thiserror::Error)]
pub enum Rejection {
    /// Caller exceeded its request window
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// Identity reached its response ceiling
    #[error("Quota of {total} responses exhausted ({used} used)")]
    QuotaExhausted { total: u64, used: u64 },

    /// Answering service failed, timed out or was unreachable
    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    /// Quota ledger could not be read; fail closed
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Boundary validation failure, raised before admission runs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Missing identity")]
    MissingIdentity,
}
