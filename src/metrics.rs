//! Prometheus metrics for the cost guard.
//!
//! All metrics live in the global default registry and are scraped from
//! `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec,
    TextEncoder,
};
use std::time::Duration;

static METERING_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!("costguard_metering_calls_total", "Usage API calls by outcome"),
        &["product_family", "outcome"]
    )
    .expect("failed to register costguard_metering_calls_total")
});

static METERING_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        prometheus::histogram_opts!(
            "costguard_metering_call_duration_seconds",
            "Usage API latency in seconds, retries included",
            vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        ),
        &["product_family"]
    )
    .expect("failed to register costguard_metering_call_duration_seconds")
});

static RATE_LIMIT_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "costguard_rate_limit_events_total",
            "Rate limiter waits and rejections"
        ),
        &["bucket", "event"]
    )
    .expect("failed to register costguard_rate_limit_events_total")
});

static SERVICE_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "costguard_service_outcomes_total",
            "Per-service results of summary runs"
        ),
        &["outcome"]
    )
    .expect("failed to register costguard_service_outcomes_total")
});

static SUMMARY_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!("costguard_summary_runs_total", "Cost summary requests"),
        &["result"]
    )
    .expect("failed to register costguard_summary_runs_total")
});

pub fn record_metering_call(product_family: &str, outcome: &str, elapsed: Duration) {
    METERING_CALLS_TOTAL
        .with_label_values(&[product_family, outcome])
        .inc();
    METERING_CALL_DURATION
        .with_label_values(&[product_family])
        .observe(elapsed.as_secs_f64());
}

pub fn record_rate_limit(bucket: &str, event: &str) {
    RATE_LIMIT_EVENTS_TOTAL
        .with_label_values(&[bucket, event])
        .inc();
}

/// `outcome` is `ok`, `unavailable`, `unmapped` or an error kind.
pub fn record_service_outcome(outcome: &str) {
    SERVICE_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

/// `result` is `computed`, `cached`, `rate_limited`, `timeout` or `error`.
pub fn record_summary_run(result: &str) {
    SUMMARY_RUNS_TOTAL.with_label_values(&[result]).inc();
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_series_are_exported() {
        record_metering_call("logs", "ok", Duration::from_millis(120));
        record_rate_limit("usage_metering", "waited");
        record_service_outcome("unmapped");
        record_summary_run("computed");

        let output = encode_metrics();
        assert!(output.contains("costguard_metering_calls_total"));
        assert!(output.contains("costguard_rate_limit_events_total"));
        assert!(output.contains("costguard_service_outcomes_total"));
        assert!(output.contains("costguard_summary_runs_total"));
        assert!(output.contains(r#"product_family="logs""#));
    }
}
