use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct ResearchMetrics {
    search_attempts: Counter<u64>,
    sessions: Counter<u64>,
    revisions: Histogram<u64>,
    duration_ms: Histogram<f64>,
}

static METRICS: OnceCell<ResearchMetrics> = OnceCell::new();

fn handles() -> &'static ResearchMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("autoresearch");
        ResearchMetrics {
            search_attempts: meter
                .u64_counter("search_attempts_total")
                .with_description("Search provider calls by outcome (success, retry, failure)")
                .init(),
            sessions: meter
                .u64_counter("sessions_total")
                .with_description("Research sessions by terminal status")
                .init(),
            revisions: meter
                .u64_histogram("session_revisions")
                .with_description("Revision counter value at session end")
                .init(),
            duration_ms: meter
                .f64_histogram("session_duration_ms")
                .with_description("Wall-clock session runtime in milliseconds")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("AUTORESEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "AUTORESEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export session metrics."
        );
    }
}

/// Count one search provider call (no-op if no provider installed).
pub fn record_search_attempt(outcome: &'static str) {
    handles()
        .search_attempts
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

/// Record the terminal status of a session.
pub fn record_session(status: &'static str, revisions: u32, duration_ms: u64) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status)];

    metrics.sessions.add(1, &attrs);
    metrics.revisions.record(u64::from(revisions), &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
}
