// Prometheus metrics for the admission gateway
//
// Exposed on the /metrics HTTP endpoint:
// - Admission outcomes by terminal state (counter)
// - Downstream call latency (histogram)
// - Caller windows held by the rate limiter (gauge)
// - Quota consumption and ledger failures (counters)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref ADMISSION_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("admission_outcomes_total", "Requests by admission outcome"),
        &["outcome"]
    ).expect("Failed to create admission outcomes metric");

    pub static ref DOWNSTREAM_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "downstream_request_duration_seconds",
            "Duration of calls to the answering service"
        ).buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["status"]
    ).expect("Failed to create downstream duration metric");

    pub static ref RATE_LIMITER_TRACKED_KEYS: IntGauge = IntGauge::new(
        "rate_limiter_tracked_keys",
        "Caller keys currently holding a rate limit window"
    ).expect("Failed to create tracked keys metric");

    pub static ref QUOTA_CONSUMPTION_RECORDED_TOTAL: IntCounter = IntCounter::new(
        "quota_consumption_recorded_total",
        "Successful responses charged against identity quotas"
    ).expect("Failed to create quota consumption metric");

    pub static ref LEDGER_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "ledger_errors_total",
        "Quota store operations that failed"
    ).expect("Failed to create ledger errors metric");
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMISSION_OUTCOMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DOWNSTREAM_REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMITER_TRACKED_KEYS.clone()))?;
    REGISTRY.register(Box::new(QUOTA_CONSUMPTION_RECORDED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEDGER_ERRORS_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
