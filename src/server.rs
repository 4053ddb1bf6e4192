//! HTTP Gateway
//!
//! Boundary glue around the admission coordinator:
//!
//! - `POST /api/prompt` validates the body and headers into an
//!   [`AdmissionRequest`] and returns the classified outcome
//! - `GET /health` liveness probe
//!
//! The identity is taken from the `X-Replit-User-Name` header, which the
//! authentication proxy in front of the gateway sets after verifying the
//! caller. It is trusted as-is.

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::admission::outcome::invalid_request;
use crate::admission::{AdmissionCoordinator, AdmissionOutcome, AdmissionRequest, RequestError};
use crate::config::Config;
use crate::downstream::{DownstreamRequest, HttpDownstream};
use crate::metrics;
use crate::metrics_server;
use crate::quota::{Identity, MemoryQuotaStore, QuotaLedger};
use crate::rate_limit::{CallerKey, SlidingWindowLimiter};

/// Header carrying the verified identity
pub const IDENTITY_HEADER: &str = "x-replit-user-name";

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Body of `POST /api/prompt`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub prompt: String,
    pub history: Vec<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// Comma-separated role list
    #[serde(default)]
    pub roles: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl PromptRequest {
    /// Parse and validate a raw JSON body
    pub fn parse(body: &[u8]) -> Result<Self, RequestError> {
        serde_json::from_slice(body).map_err(|e| RequestError::InvalidBody(e.to_string()))
    }

    /// Build the admission request for `identity`, rate limited under `caller`
    pub fn into_admission(self, identity: Identity, caller: CallerKey) -> AdmissionRequest {
        let roles = self
            .roles
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();

        let credential = self.api_key.filter(|k| !k.trim().is_empty());

        AdmissionRequest {
            caller,
            own_credential: credential.is_some(),
            prompt: DownstreamRequest {
                identity,
                prompt: self.prompt,
                history: self.history,
                bio: self.bio.unwrap_or_default(),
                roles,
                credential,
            },
        }
    }
}

#[derive(Clone)]
struct AppState {
    coordinator: AdmissionCoordinator,
}

/// Build the gateway router
pub fn router(coordinator: AdmissionCoordinator) -> Router {
    Router::new()
        .route("/api/prompt", post(prompt_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { coordinator })
}

/// Wire the coordinator from configuration and serve until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;

    let limiter = SlidingWindowLimiter::from_config(&config.rate_limit);
    let ledger = QuotaLedger::new(Arc::new(MemoryQuotaStore::new()), config.quota.clone());
    let downstream = HttpDownstream::new(
        config.downstream.url.clone(),
        config.downstream.secret.clone(),
        config.downstream.timeout(),
    )
    .context("Failed to create downstream client")?;

    tracing::warn!("Quota usage is held in memory only and starts from zero on every restart");
    if config.downstream.secret.is_empty() {
        tracing::warn!("No downstream secret configured; calls will be sent without one");
    }

    let coordinator = AdmissionCoordinator::new(limiter.clone(), ledger, Arc::new(downstream))
        .with_downstream_timeout(config.downstream.timeout());

    let sweeper = spawn_sweeper(limiter, config.rate_limit.sweep_interval());

    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = metrics_server::start_metrics_server(port).await {
                tracing::error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway on {}", addr))?;

    info!(
        "Gateway listening on {} ({} req / {}ms per caller, ceiling {})",
        addr, config.rate_limit.max_requests, config.rate_limit.window_ms, config.quota.ceiling
    );

    axum::serve(
        listener,
        router(coordinator).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Gateway server error")?;

    sweeper.abort();
    info!("Gateway stopped");
    Ok(())
}

/// Periodically drop idle caller windows
pub fn spawn_sweeper(limiter: SlidingWindowLimiter, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep(Instant::now());
            if removed > 0 {
                debug!(removed, tracked = limiter.tracked_keys(), "Swept idle caller windows");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Prompt endpoint handler
async fn prompt_handler(State(state): State<AppState>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();

    let identity = match identity_from(&parts.headers) {
        Ok(identity) => identity,
        Err(e) => return reject(&e),
    };

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return reject(&RequestError::InvalidBody(e.to_string())),
    };
    let prompt = match PromptRequest::parse(&bytes) {
        Ok(prompt) => prompt,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed prompt body");
            return reject(&e);
        }
    };

    let caller = caller_key(&parts.headers, peer, &identity);
    let outcome = state
        .coordinator
        .handle(prompt.into_admission(identity, caller))
        .await;

    outcome_response(outcome)
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

fn identity_from(headers: &HeaderMap) -> Result<Identity, RequestError> {
    headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Identity::new)
        .ok_or(RequestError::MissingIdentity)
}

/// Rate limit key: first forwarded-for hop, else the peer address, else the identity
pub fn caller_key(headers: &HeaderMap, peer: Option<SocketAddr>, identity: &Identity) -> CallerKey {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(hop), _) => CallerKey::new(hop),
        (None, Some(addr)) => CallerKey::from(addr.ip()),
        (None, None) => CallerKey::new(identity.as_str()),
    }
}

fn reject(error: &RequestError) -> Response {
    let (status, payload) = invalid_request(error);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(payload)).into_response()
}

fn outcome_response(outcome: AdmissionOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(outcome.body)).into_response();

    if let Some(retry_after) = outcome.retry_after {
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }

    response
}
