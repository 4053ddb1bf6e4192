//! Admission Coordinator
//!
//! Runs one request through the gateway:
//!
//! ```text
//! START ──admit?──no──▶ RATE_LIMITED
//!   │yes
//!   ▼
//! quota ──error──▶ LEDGER_ERROR
//!   │  └─exhausted──▶ QUOTA_EXHAUSTED
//!   ▼
//! forward ──fail/timeout──▶ DOWNSTREAM_ERROR
//!   │ok
//!   ▼
//! record consumption ──▶ FORWARDED
//! ```
//!
//! Quota is charged only after the downstream call has succeeded. The rate
//! limit slot taken in the first step is never given back, even if the
//! request later fails or is abandoned.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::error::Rejection;
use super::outcome::AdmissionOutcome;
use crate::downstream::{Downstream, DownstreamError, DownstreamRequest, DownstreamResponse};
use crate::metrics;
use crate::quota::{Ceiling, QuotaLedger};
use crate::rate_limit::{CallerKey, SlidingWindowLimiter};

/// Default deadline for one downstream call
pub const DEFAULT_DOWNSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// A validated request, ready for admission
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Key the rate limit is scoped to
    pub caller: CallerKey,

    /// Prompt to forward; its identity is the one charged
    pub prompt: DownstreamRequest,

    /// The caller presented its own downstream credential for this request
    pub own_credential: bool,
}

/// Orchestrates the limiter, the ledger and the downstream call
#[derive(Clone)]
pub struct AdmissionCoordinator {
    limiter: SlidingWindowLimiter,
    ledger: QuotaLedger,
    downstream: Arc<dyn Downstream>,
    downstream_timeout: Duration,
}

impl AdmissionCoordinator {
    /// Create a coordinator
    pub fn new(
        limiter: SlidingWindowLimiter,
        ledger: QuotaLedger,
        downstream: Arc<dyn Downstream>,
    ) -> Self {
        Self {
            limiter,
            ledger,
            downstream,
            downstream_timeout: DEFAULT_DOWNSTREAM_TIMEOUT,
        }
    }

    /// Set the downstream deadline
    pub fn with_downstream_timeout(mut self, timeout: Duration) -> Self {
        self.downstream_timeout = timeout;
        self
    }

    /// Run `request` through admission using the current time
    pub async fn handle(&self, request: AdmissionRequest) -> AdmissionOutcome {
        self.handle_at(request, Instant::now()).await
    }

    /// Run `request` through admission as if it arrived at `now`
    pub async fn handle_at(&self, request: AdmissionRequest, now: Instant) -> AdmissionOutcome {
        let span = info_span!(
            "admission",
            request_id = %Uuid::new_v4(),
            caller = %request.caller,
            identity = %request.prompt.identity,
        );

        async move {
            let outcome = match self.run(&request, now).await {
                Ok(response) => AdmissionOutcome::forwarded(response),
                Err(rejection) => {
                    log_rejection(&rejection);
                    AdmissionOutcome::rejected(&rejection)
                }
            };

            metrics::ADMISSION_OUTCOMES_TOTAL
                .with_label_values(&[outcome.state.as_str()])
                .inc();
            info!(outcome = outcome.state.as_str(), status = outcome.status, "Admission finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &AdmissionRequest,
        now: Instant,
    ) -> Result<DownstreamResponse, Rejection> {
        let limit = self.limiter.check(&request.caller, now);
        if !limit.allowed {
            return Err(Rejection::RateLimited {
                retry_after: limit.retry_after,
            });
        }

        let identity = &request.prompt.identity;
        let decision = self.ledger.decision_with(identity, request.own_credential).await?;
        if decision.is_exhausted() {
            let total = match decision.total {
                Ceiling::Limited(total) => total,
                Ceiling::Unbounded => u64::MAX,
            };
            return Err(Rejection::QuotaExhausted {
                total,
                used: decision.used,
            });
        }

        let response = self.forward(&request.prompt).await?;

        // The answer already exists; losing the charge favours the caller.
        match self
            .ledger
            .record_consumption_with(identity, request.own_credential)
            .await {
            Ok(Some(count)) => debug!(count, "Charged one response"),
            Ok(None) => debug!("Own credential, nothing charged"),
            Err(e) => error!(error = %e, "Failed to record consumption after successful forward"),
        }

        Ok(response)
    }

    async fn forward(&self, prompt: &DownstreamRequest) -> Result<DownstreamResponse, DownstreamError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.downstream_timeout, self.downstream.ask(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(DownstreamError::Timeout(self.downstream_timeout)),
        };

        let label = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::DOWNSTREAM_REQUEST_DURATION_SECONDS
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());

        result
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }
}

fn log_rejection(rejection: &Rejection) {
    match rejection {
        Rejection::RateLimited { .. } | Rejection::QuotaExhausted { .. } => {
            info!(reason = %rejection, "Request rejected")
        }
        Rejection::Downstream(e) => warn!(kind = e.kind(), error = %e, "Downstream failure"),
        Rejection::Ledger(e) => error!(error = %e, "Quota ledger unavailable, failing closed"),
    }
}
