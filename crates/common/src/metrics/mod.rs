//! Metrics and observability utilities
//!
//! Prometheus metrics with SLO-aligned histograms and standardized
//! naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Relaygate metrics
pub const METRICS_PREFIX: &str = "relaygate";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms for gateway overhead
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_credential_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Credential resolutions by source and outcome"
    );

    describe_counter!(
        format!("{}_rate_limit_decisions_total", METRICS_PREFIX),
        Unit::Count,
        "Rate limit decisions by outcome"
    );

    describe_counter!(
        format!("{}_domain_verifications_total", METRICS_PREFIX),
        Unit::Count,
        "Domain verification attempts by resulting status"
    );

    describe_counter!(
        format!("{}_domain_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Domain status transitions"
    );

    describe_counter!(
        format!("{}_audit_write_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Audit entries dropped because the sink failed"
    );

    describe_histogram!(
        format!("{}_upstream_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Upstream forwarding latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record credential resolution outcomes
pub fn record_credential_resolution(source: &str, success: bool) {
    let outcome = if success { "resolved" } else { "rejected" };
    counter!(
        format!("{}_credential_resolutions_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Helper to record rate limit decisions (`allowed`, `denied`, `fail_open`)
pub fn record_rate_limit(decision: &'static str) {
    counter!(
        format!("{}_rate_limit_decisions_total", METRICS_PREFIX),
        "decision" => decision
    )
    .increment(1);
}

/// Helper to record a verification attempt
pub fn record_domain_verification(status: &str, verified: bool) {
    counter!(
        format!("{}_domain_verifications_total", METRICS_PREFIX),
        "status" => status.to_string(),
        "verified" => verified.to_string()
    )
    .increment(1);
}

/// Helper to record a status transition
pub fn record_domain_transition(from: &str, to: &str) {
    counter!(
        format!("{}_domain_transitions_total", METRICS_PREFIX),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Helper to record a dropped audit entry
pub fn record_audit_write_failure(action: &str) {
    counter!(
        format!("{}_audit_write_failures_total", METRICS_PREFIX),
        "action" => action.to_string()
    )
    .increment(1);
}

/// Helper to record upstream forwarding latency
pub fn record_upstream(duration_secs: f64, status: u16) {
    histogram!(
        format!("{}_upstream_duration_seconds", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .record(duration_secs);
}
