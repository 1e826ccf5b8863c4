//! One typed counter/histogram/gauge registry with static names declared at
//! startup: every metric is registered exactly once, at first use, into a
//! single process-wide `Registry` (the `LazyLock<Registry>` pattern) that
//! `/metrics` serializes on demand.

use std::sync::LazyLock;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        Opts::new("gateway_requests_total", "Total ingress requests by terminal outcome"),
        &["outcome"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static SCAN_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new(
        "scan_duration_ms",
        "Total scanner pipeline execution time in milliseconds",
    ))
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).expect("metric not yet registered");
    h
});

pub static POLICY_DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        Opts::new("policy_decisions_total", "Policy engine decisions by action"),
        &["action"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static QUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("queue_depth", "Current admission queue depth by priority band"),
        &["priority"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static QUEUE_WAIT_MS: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new(
        "queue_wait_ms",
        "Time spent queued before dequeue, in milliseconds",
    ))
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).expect("metric not yet registered");
    h
});

pub static CIRCUIT_STATE: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("circuit_breaker_open", "1 if the circuit breaker is open, else 0")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static ENDPOINT_HEALTHY: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("endpoint_healthy", "1 if the endpoint is enabled and healthy, else 0"),
        &["endpoint_id"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("semantic_cache_hits_total", "Total semantic cache hits")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("semantic_cache_misses_total", "Total semantic cache misses")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static COST_TOTAL_USD: LazyLock<IntCounterVec> = LazyLock::new(|| {
    // Tracked in hundredths-of-a-cent integer units; prometheus counters are
    // integral, so cost is multiplied before recording and divided back out
    // on scrape by the consuming dashboard.
    let c = IntCounterVec::new(
        Opts::new("cost_microusd_total", "Total cost in micro-USD by provider/model"),
        &["provider", "model"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

/// Force every metric to register, so `/metrics` reports a zero value for
/// counters that haven't fired yet instead of omitting them entirely.
pub fn init() {
    LazyLock::force(&REQUESTS_TOTAL);
    LazyLock::force(&SCAN_DURATION);
    LazyLock::force(&POLICY_DECISIONS);
    LazyLock::force(&QUEUE_DEPTH);
    LazyLock::force(&QUEUE_WAIT_MS);
    LazyLock::force(&CIRCUIT_STATE);
    LazyLock::force(&ENDPOINT_HEALTHY);
    LazyLock::force(&CACHE_HITS);
    LazyLock::force(&CACHE_MISSES);
    LazyLock::force(&COST_TOTAL_USD);
}
