//! End-to-end admission scenarios against in-memory collaborators

use async_trait::async_trait;
use futures::future::join_all;
use quotagate::admission::{
    AdmissionCoordinator, AdmissionOutcome, AdmissionRequest, AdmissionState, OutcomeBody,
};
use quotagate::downstream::{Downstream, DownstreamError, DownstreamRequest, DownstreamResponse};
use quotagate::quota::{
    Identity, MemoryQuotaStore, QuotaConfig, QuotaLedger, QuotaRecord, QuotaStore, StoreError,
};
use quotagate::rate_limit::{CallerKey, SlidingWindowLimiter};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Answers every prompt with a fixed reply after an optional delay
struct Answering {
    delay: Duration,
    calls: AtomicUsize,
}

impl Answering {
    fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downstream for Answering {
    async fn ask(&self, request: &DownstreamRequest) -> Result<DownstreamResponse, DownstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(DownstreamResponse {
            status: 200,
            body: json!({ "success": true, "answer": format!("re: {}", request.prompt) }),
        })
    }
}

/// Fails every prompt with the given status and message
struct Failing(u16, Option<&'static str>);

#[async_trait]
impl Downstream for Failing {
    async fn ask(&self, _: &DownstreamRequest) -> Result<DownstreamResponse, DownstreamError> {
        Err(DownstreamError::Status {
            status: self.0,
            message: self.1.map(str::to_string),
        })
    }
}

/// Quota store whose backend is unreachable
struct Unreachable;

#[async_trait]
impl QuotaStore for Unreachable {
    async fn get(&self, _: &Identity) -> Result<QuotaRecord, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn increment(&self, _: &Identity) -> Result<Option<u64>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set_own_credential(&self, _: &Identity, _: bool) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn reset(&self, _: &Identity) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

fn request(caller: &str, identity: &str) -> AdmissionRequest {
    AdmissionRequest {
        caller: CallerKey::from(caller),
        prompt: DownstreamRequest {
            identity: Identity::from(identity),
            prompt: "How did you start?".to_string(),
            history: vec!["Hi".to_string(), "Hello!".to_string()],
            bio: "Builder".to_string(),
            roles: vec!["founder".to_string()],
            credential: None,
        },
        own_credential: false,
    }
}

fn gateway(
    max_requests: u32,
    ceiling: u64,
    store: Arc<dyn QuotaStore>,
    downstream: Arc<dyn Downstream>,
) -> AdmissionCoordinator {
    AdmissionCoordinator::new(
        SlidingWindowLimiter::new(max_requests, Duration::from_millis(60_000)),
        QuotaLedger::new(store, QuotaConfig::with_ceiling(ceiling)),
        downstream,
    )
}

async fn used(store: &MemoryQuotaStore, identity: &str) -> u64 {
    store.get(&Identity::from(identity)).await.unwrap().response_count
}

fn answer(outcome: &AdmissionOutcome) -> Option<String> {
    match &outcome.body {
        OutcomeBody::Passthrough(body) => body["answer"].as_str().map(str::to_string),
        OutcomeBody::Payload(payload) => payload.answer.clone(),
    }
}

#[tokio::test]
async fn twenty_requests_in_a_second_then_throttled() {
    let store = MemoryQuotaStore::new();
    let downstream = Answering::new();
    let gateway = gateway(20, 1_000, Arc::new(store.clone()), downstream.clone());
    let start = Instant::now();

    for i in 0..20 {
        let at = start + Duration::from_millis(i * 50);
        let outcome = gateway.handle_at(request("198.51.100.7", "alice"), at).await;
        assert_eq!(outcome.state, AdmissionState::Forwarded, "request {}", i + 1);
    }

    let outcome = gateway
        .handle_at(request("198.51.100.7", "alice"), start + Duration::from_millis(999))
        .await;
    assert_eq!(outcome.state, AdmissionState::RateLimited);
    assert_eq!(outcome.status, 429);
    assert!(!outcome.payload().unwrap().success);

    assert_eq!(downstream.calls(), 20);
    assert_eq!(used(&store, "alice").await, 20);
}

#[tokio::test]
async fn slot_frees_exactly_at_window_boundary() {
    let store = MemoryQuotaStore::new();
    let gateway = gateway(1, 1_000, Arc::new(store.clone()), Answering::new());
    let start = Instant::now();

    let first = gateway.handle_at(request("10.0.0.1", "bob"), start).await;
    assert_eq!(first.state, AdmissionState::Forwarded);

    let early = gateway
        .handle_at(request("10.0.0.1", "bob"), start + Duration::from_millis(59_999))
        .await;
    assert_eq!(early.state, AdmissionState::RateLimited);

    let boundary = gateway
        .handle_at(request("10.0.0.1", "bob"), start + Duration::from_millis(60_000))
        .await;
    assert_eq!(boundary.state, AdmissionState::Forwarded);
}

#[tokio::test]
async fn callers_are_limited_independently() {
    let store = MemoryQuotaStore::new();
    let gateway = gateway(1, 1_000, Arc::new(store.clone()), Answering::new());
    let now = Instant::now();

    assert_eq!(
        gateway.handle_at(request("10.0.0.1", "carol"), now).await.state,
        AdmissionState::Forwarded
    );
    assert_eq!(
        gateway.handle_at(request("10.0.0.2", "carol"), now).await.state,
        AdmissionState::Forwarded
    );
    assert_eq!(
        gateway.handle_at(request("10.0.0.1", "carol"), now).await.state,
        AdmissionState::RateLimited
    );
}

#[tokio::test]
async fn last_response_of_quota_then_exhausted() {
    let store = MemoryQuotaStore::new();
    store
        .insert(QuotaRecord {
            response_count: 49,
            ..QuotaRecord::empty(Identity::from("dana"))
        })
        .await;
    let downstream = Answering::new();
    let gateway = gateway(20, 50, Arc::new(store.clone()), downstream.clone());

    let last = gateway.handle(request("10.0.0.3", "dana")).await;
    assert_eq!(last.state, AdmissionState::Forwarded);
    assert_eq!(used(&store, "dana").await, 50);

    let exhausted = gateway.handle(request("10.0.0.3", "dana")).await;
    assert_eq!(exhausted.state, AdmissionState::QuotaExhausted);
    assert_eq!(exhausted.status, 429);

    let payload = exhausted.payload().unwrap();
    assert!(payload.success);
    assert!(answer(&exhausted).unwrap().contains("quota of 50 responses"));

    assert_eq!(downstream.calls(), 1);
    assert_eq!(used(&store, "dana").await, 50);
}

#[tokio::test]
async fn exhaustion_persists_until_ceiling_is_raised() {
    let store = MemoryQuotaStore::new();
    store
        .insert(QuotaRecord {
            response_count: 5,
            ..QuotaRecord::empty(Identity::from("erin"))
        })
        .await;

    let limited = gateway(100, 5, Arc::new(store.clone()), Answering::new());
    for _ in 0..3 {
        let outcome = limited.handle(request("10.0.0.4", "erin")).await;
        assert_eq!(outcome.state, AdmissionState::QuotaExhausted);
    }

    let raised = AdmissionCoordinator::new(
        SlidingWindowLimiter::new(100, Duration::from_secs(60)),
        QuotaLedger::new(
            Arc::new(store.clone()),
            QuotaConfig::with_ceiling(5).with_override("erin", 10),
        ),
        Answering::new(),
    );
    let outcome = raised.handle(request("10.0.0.4", "erin")).await;
    assert_eq!(outcome.state, AdmissionState::Forwarded);
    assert_eq!(used(&store, "erin").await, 6);
}

#[tokio::test]
async fn downstream_failure_leaves_count_unchanged() {
    let store = MemoryQuotaStore::new();
    store
        .insert(QuotaRecord {
            response_count: 3,
            ..QuotaRecord::empty(Identity::from("frank"))
        })
        .await;
    let gateway = gateway(
        20,
        50,
        Arc::new(store.clone()),
        Arc::new(Failing(502, Some("Model is overloaded"))),
    );

    let outcome = gateway.handle(request("10.0.0.5", "frank")).await;

    assert_eq!(outcome.state, AdmissionState::DownstreamError);
    assert_eq!(outcome.status, 500);
    let payload = outcome.payload().unwrap();
    assert!(!payload.success);
    assert_eq!(payload.message.as_deref(), Some("Model is overloaded"));
    assert_eq!(used(&store, "frank").await, 3);
}

#[tokio::test]
async fn downstream_failure_without_message_is_generic() {
    let store = MemoryQuotaStore::new();
    let gateway = gateway(20, 50, Arc::new(store.clone()), Arc::new(Failing(500, None)));

    let outcome = gateway.handle(request("10.0.0.6", "gina")).await;

    assert_eq!(
        outcome.payload().unwrap().message.as_deref(),
        Some("Internal Server Error, Please try again")
    );
    assert_eq!(store.count().await, 0);
}

#[tokio::test]
async fn concurrent_forwards_are_all_counted() {
    let store = MemoryQuotaStore::new();
    let downstream = Answering::slow(Duration::from_millis(5));
    let gateway = gateway(1_000, 1_000, Arc::new(store.clone()), downstream.clone());

    let outcomes = join_all((0..64).map(|i| {
        let gateway = gateway.clone();
        async move { gateway.handle(request(&format!("10.1.0.{}", i), "hank")).await }
    }))
    .await;

    assert!(outcomes.iter().all(|o| o.state == AdmissionState::Forwarded));
    assert_eq!(downstream.calls(), 64);
    assert_eq!(used(&store, "hank").await, 64);
}

#[tokio::test]
async fn concurrent_burst_from_one_caller_respects_limit() {
    let store = MemoryQuotaStore::new();
    let downstream = Answering::new();
    let gateway = gateway(5, 1_000, Arc::new(store.clone()), downstream.clone());
    let now = Instant::now();

    let outcomes = join_all((0..32).map(|_| {
        let gateway = gateway.clone();
        async move { gateway.handle_at(request("203.0.113.1", "ivy"), now).await }
    }))
    .await;

    let forwarded = outcomes
        .iter()
        .filter(|o| o.state == AdmissionState::Forwarded)
        .count();
    assert_eq!(forwarded, 5);
    assert_eq!(downstream.calls(), 5);
}

#[tokio::test]
async fn own_credential_is_never_charged() {
    let store = MemoryQuotaStore::new();
    store
        .insert(QuotaRecord {
            response_count: 500,
            has_own_credential: true,
            ..QuotaRecord::empty(Identity::from("jo"))
        })
        .await;
    let gateway = gateway(100, 50, Arc::new(store.clone()), Answering::new());

    for _ in 0..10 {
        let outcome = gateway.handle(request("10.0.0.7", "jo")).await;
        assert_eq!(outcome.state, AdmissionState::Forwarded);
    }
    assert_eq!(used(&store, "jo").await, 500);
}

#[tokio::test]
async fn ledger_outage_fails_closed() {
    let downstream = Answering::new();
    let gateway = gateway(20, 50, Arc::new(Unreachable), downstream.clone());

    let outcome = gateway.handle(request("10.0.0.8", "kim")).await;

    assert_eq!(outcome.state, AdmissionState::LedgerError);
    assert_eq!(outcome.status, 500);
    assert!(!outcome.payload().unwrap().success);
    assert_eq!(downstream.calls(), 0);
}

#[tokio::test]
async fn rate_slot_is_spent_even_when_quota_rejects() {
    let store = MemoryQuotaStore::new();
    store
        .insert(QuotaRecord {
            response_count: 1,
            ..QuotaRecord::empty(Identity::from("lee"))
        })
        .await;
    let gateway = gateway(2, 1, Arc::new(store.clone()), Answering::new());
    let now = Instant::now();

    for _ in 0..2 {
        let outcome = gateway.handle_at(request("10.0.0.9", "lee"), now).await;
        assert_eq!(outcome.state, AdmissionState::QuotaExhausted);
    }
    let outcome = gateway.handle_at(request("10.0.0.9", "lee"), now).await;
    assert_eq!(outcome.state, AdmissionState::RateLimited);
}
