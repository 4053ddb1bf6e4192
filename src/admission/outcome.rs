//! Admission Outcomes
//!
//! Converts each terminal state of the pipeline into the caller-facing
//! `{ success, answer, message }` payload and an HTTP status.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::error::{Rejection, RequestError};
use crate::downstream::DownstreamResponse;

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";
pub const GENERIC_ERROR_MESSAGE: &str = "Internal Server Error, Please try again";
pub const INVALID_BODY_MESSAGE: &str = "Invalid request body";

/// Terminal state of one admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    Forwarded,
    RateLimited,
    QuotaExhausted,
    DownstreamError,
    LedgerError,
}

impl AdmissionState {
    /// Metric/log label
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionState::Forwarded => "forwarded",
            AdmissionState::RateLimited => "rate_limited",
            AdmissionState::QuotaExhausted => "quota_exhausted",
            AdmissionState::DownstreamError => "downstream_error",
            AdmissionState::LedgerError => "ledger_error",
        }
    }
}

/// Caller-facing body for every non-forwarded outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomePayload {
    pub success: bool,
    pub answer: Option<String>,
    pub message: Option<String>,
}

impl OutcomePayload {
    /// Failed request with a message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            answer: None,
            message: Some(message.into()),
        }
    }

    /// Successful response whose answer is informative rather than generated
    pub fn notice(answer: impl Into<String>) -> Self {
        Self {
            success: true,
            answer: Some(answer.into()),
            message: None,
        }
    }
}

/// Response body: downstream JSON verbatim, or a gateway payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutcomeBody {
    Passthrough(Value),
    Payload(OutcomePayload),
}

/// Result of running one request through admission
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionOutcome {
    pub state: AdmissionState,

    /// HTTP-style status classification
    pub status: u16,

    pub body: OutcomeBody,

    /// Set when rate limited and the window reports when a slot frees up
    pub retry_after: Option<Duration>,
}

impl AdmissionOutcome {
    /// Downstream answered; pass its status and body through
    pub fn forwarded(response: DownstreamResponse) -> Self {
        Self {
            state: AdmissionState::Forwarded,
            status: response.status,
            body: OutcomeBody::Passthrough(response.body),
            retry_after: None,
        }
    }

    /// Classify a rejection
    pub fn rejected(rejection: &Rejection) -> Self {
        match rejection {
            Rejection::RateLimited { retry_after } => Self {
                state: AdmissionState::RateLimited,
                status: STATUS_TOO_MANY_REQUESTS,
                body: OutcomeBody::Payload(OutcomePayload::error(RATE_LIMITED_MESSAGE)),
                retry_after: *retry_after,
            },
            // Exhaustion is an expected answer, not a failure
            Rejection::QuotaExhausted { total, .. } => Self {
                state: AdmissionState::QuotaExhausted,
                status: STATUS_TOO_MANY_REQUESTS,
                body: OutcomeBody::Payload(OutcomePayload::notice(quota_exhausted_answer(*total))),
                retry_after: None,
            },
            Rejection::Downstream(e) => Self {
                state: AdmissionState::DownstreamError,
                status: STATUS_INTERNAL_ERROR,
                body: OutcomeBody::Payload(OutcomePayload::error(
                    e.message().unwrap_or(GENERIC_ERROR_MESSAGE),
                )),
                retry_after: None,
            },
            Rejection::Ledger(_) => Self {
                state: AdmissionState::LedgerError,
                status: STATUS_INTERNAL_ERROR,
                body: OutcomeBody::Payload(OutcomePayload::error(GENERIC_ERROR_MESSAGE)),
                retry_after: None,
            },
        }
    }

    /// Body as a gateway payload, `None` for passthrough
    pub fn payload(&self) -> Option<&OutcomePayload> {
        match &self.body {
            OutcomeBody::Payload(p) => Some(p),
            OutcomeBody::Passthrough(_) => None,
        }
    }
}

/// Status and payload for a request rejected at the boundary
pub fn invalid_request(error: &RequestError) -> (u16, OutcomePayload) {
    match error {
        RequestError::InvalidBody(_) => (STATUS_BAD_REQUEST, OutcomePayload::error(INVALID_BODY_MESSAGE)),
        RequestError::MissingIdentity => (STATUS_UNAUTHORIZED, OutcomePayload::error("Unauthorized")),
    }
}

/// Answer shown once an identity's quota is used up
pub fn quota_exhausted_answer(total: u64) -> String {
    format!(
        "You've used up your quota of {} responses. If you would like to increase your quota, \
         you can add your own API key in settings.",
        total
    )
}
