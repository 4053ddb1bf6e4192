//! HTTP Downstream Client
//!
//! Forwards prompts to the answering service with a JSON POST. Each call is
//! a single request/response exchange; the gateway never retries on its own
//! since a retried prompt could be charged twice.
//!
//! # Wire format
//!
//! ```text
//! POST <url>
//! { "question", "secret", "bio", "username", "history", "roles", "apiKey" }
//! ```
//!
//! `200` is success and the JSON body is returned untouched. Any other status
//! is a failure whose `message` field, when present, is surfaced to the caller.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::{Downstream, DownstreamError, DownstreamRequest, DownstreamResponse};

/// Body sent to the answering service
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AskBody<'a> {
    question: &'a str,
    secret: &'a str,
    bio: &'a str,
    username: &'a str,
    history: &'a [String],
    roles: String,
    api_key: Option<&'a str>,
}

/// reqwest-backed [`Downstream`]
#[derive(Clone)]
pub struct HttpDownstream {
    /// Reqwest HTTP client
    client: reqwest::Client,

    /// Answering service endpoint
    url: String,

    /// Shared secret proving the call comes from the gateway
    secret: String,

    /// Request timeout
    timeout: Duration,
}

impl fmt::Debug for HttpDownstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDownstream")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpDownstream {
    /// Create a client for the service at `url`
    ///
    /// # Errors
    ///
    /// Returns [`DownstreamError::Transport`] if the HTTP client cannot be built
    /// (e.g. no TLS backend available).
    pub fn new(
        url: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DownstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownstreamError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
            timeout,
        })
    }

    /// Get the service URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn ask(&self, request: &DownstreamRequest) -> Result<DownstreamResponse, DownstreamError> {
        let body = AskBody {
            question: &request.prompt,
            secret: &self.secret,
            bio: &request.bio,
            username: request.identity.as_str(),
            history: &request.history,
            roles: request.roles.join(", "),
            api_key: request.credential.as_deref(),
        };

        tracing::debug!("Forwarding prompt to {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DownstreamError::Timeout(self.timeout)
                } else {
                    DownstreamError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 200 {
            let body = response
                .json::<Value>()
                .await
                .map_err(|e| DownstreamError::InvalidPayload(e.to_string()))?;
            return Ok(DownstreamResponse { status, body });
        }

        // The service reports failures as `{ "message": ... }`, but a proxy in
        // between may answer with anything.
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string));

        tracing::warn!(status, "Downstream request failed");
        Err(DownstreamError::Status { status, message })
    }
}
