//! Downstream Answering Service
//!
//! The gateway forwards admitted prompts to a single answering service. The
//! admission layer only needs to know whether a call succeeded; the success
//! payload is opaque and is handed back to the caller verbatim.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::quota::Identity;

pub use http::HttpDownstream;

/// One prompt to forward
#[derive(Clone)]
pub struct DownstreamRequest {
    /// Resource owner the answer is generated for
    pub identity: Identity,

    /// The question text
    pub prompt: String,

    /// Earlier turns of the conversation, oldest first
    pub history: Vec<String>,

    /// Owner biography used to prime the answer
    pub bio: String,

    /// Owner roles
    pub roles: Vec<String>,

    /// Caller's own downstream credential, if any
    pub credential: Option<String>,
}

impl fmt::Debug for DownstreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownstreamRequest")
            .field("identity", &self.identity)
            .field("prompt_len", &self.prompt.len())
            .field("history_len", &self.history.len())
            .field("roles", &self.roles)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Successful answer from the downstream service
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamResponse {
    /// HTTP status reported by the service
    pub status: u16,

    /// Response body, passed through untouched
    pub body: Value,
}

/// Error types for downstream calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownstreamError {
    /// Service answered with a non-success status
    #[error("Downstream returned status {status}")]
    Status { status: u16, message: Option<String> },

    /// Request never completed (connect, DNS, reset, ...)
    #[error("Downstream transport error: {0}")]
    Transport(String),

    /// No answer within the deadline
    #[error("Downstream timed out after {0:?}")]
    Timeout(Duration),

    /// Success status with a body that is not JSON
    #[error("Invalid downstream payload: {0}")]
    InvalidPayload(String),
}

impl DownstreamError {
    /// Human-readable message reported by the service itself, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            DownstreamError::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DownstreamError::Status { .. } => "status",
            DownstreamError::Transport(_) => "transport",
            DownstreamError::Timeout(_) => "timeout",
            DownstreamError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

/// The answering service the gateway protects
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Forward one prompt and wait for the answer
    async fn ask(&self, request: &DownstreamRequest) -> Result<DownstreamResponse, DownstreamError>;
}
