//! Prometheus metrics for the Vigil server.
//!
//! Exposes vote transition counts, conflict retries, apply latency, and
//! counter reconciliation results.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no subject or voter identifiers, only aggregate activity.
//! Restrict the endpoint to scraper addresses at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Vote metrics
pub static VOTES_APPLIED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vigil_votes_applied_total",
            "Total number of committed vote transitions by transition type",
        ),
        &["transition"],
    )
    .expect("metric creation failed")
});

pub static VOTE_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vigil_vote_conflicts_total",
        "Total number of vote attempts rolled back by a concurrent write",
    )
    .expect("metric creation failed")
});

pub static VOTE_CONFLICTS_EXHAUSTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vigil_vote_conflicts_exhausted_total",
        "Total number of votes that failed after exhausting all retry attempts",
    )
    .expect("metric creation failed")
});

pub static VOTE_APPLY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "vigil_vote_apply_duration_seconds",
            "Time taken to apply a vote, including retries",
        )
        .buckets(vec![
            0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
        ]),
    )
    .expect("metric creation failed")
});

// Reconciliation metrics
pub static COUNTER_RECONCILIATIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vigil_counter_reconciliations_total",
        "Total number of subjects whose counters were checked against the ledger",
    )
    .expect("metric creation failed")
});

pub static COUNTER_DRIFT_REPAIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vigil_counter_drift_repaired_total",
        "Total number of subjects whose drifted counters were rewritten",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(VOTES_APPLIED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(VOTE_CONFLICTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(VOTE_CONFLICTS_EXHAUSTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(VOTE_APPLY_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COUNTER_RECONCILIATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COUNTER_DRIFT_REPAIRED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a committed vote transition.
pub fn record_vote_applied(transition: &str) {
    VOTES_APPLIED.with_label_values(&[transition]).inc();
}
