//! Prometheus metrics for the stage pipeline

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramVec, IntCounter, TextEncoder, register_counter_vec,
    register_histogram_vec, register_int_counter,
};

lazy_static! {
    /// Stage service attempts by channel and outcome
    pub static ref GATEWAY_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "pipeline_gateway_attempts_total",
        "Total number of attempts against the stage service",
        &["channel", "status"]
    )
    .unwrap();

    /// Duration of single stage service attempts in seconds
    pub static ref GATEWAY_ATTEMPT_DURATION: HistogramVec = register_histogram_vec!(
        "pipeline_gateway_attempt_duration_seconds",
        "Duration of stage service attempts in seconds",
        &["channel"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    /// Stage executions by node and outcome code
    pub static ref STAGE_EXECUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "pipeline_stage_executions_total",
        "Total number of stage executions",
        &["node_id", "outcome"]
    )
    .unwrap();

    /// End-to-end stage execution duration in seconds
    pub static ref STAGE_DURATION: HistogramVec = register_histogram_vec!(
        "pipeline_stage_duration_seconds",
        "Duration of stage executions in seconds",
        &["node_id"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    /// Usage events dropped as malformed
    pub static ref USAGE_EVENTS_DROPPED: IntCounter = register_int_counter!(
        "pipeline_usage_events_dropped_total",
        "Total number of malformed usage events dropped"
    )
    .unwrap();
}

/// Export all pipeline metrics in Prometheus text format
pub fn export_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_gateway_attempt(channel: &str, status: &str, duration_secs: f64) {
    GATEWAY_ATTEMPTS_TOTAL
        .with_label_values(&[channel, status])
        .inc();
    GATEWAY_ATTEMPT_DURATION
        .with_label_values(&[channel])
        .observe(duration_secs);
}

pub fn record_stage_execution(node_id: &str, outcome: &str, duration_secs: f64) {
    STAGE_EXECUTIONS_TOTAL
        .with_label_values(&[node_id, outcome])
        .inc();
    STAGE_DURATION
        .with_label_values(&[node_id])
        .observe(duration_secs);
}

pub fn record_usage_dropped() {
    USAGE_EVENTS_DROPPED.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_includes_recorded_metrics() {
        record_stage_execution("search", "success", 0.25);
        record_usage_dropped();

        let text = export_metrics().unwrap();
        assert!(text.contains("pipeline_stage_executions_total"));
        assert!(text.contains("pipeline_usage_events_dropped_total"));
    }
}
