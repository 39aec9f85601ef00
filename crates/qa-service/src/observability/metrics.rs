//! Prometheus metrics for the Q&A service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `qa_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `operation`: bounded by store methods and orchestrator operations (~30)
//! - `status`: `success` | `error`
//! - `source`: `voice` | `written` | `moderator` | `random`
//! - `actor_type`: `controller` | `meeting`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
];

/// Initialize the Prometheus recorder and return the handle used to
/// render `/metrics`.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("qa_store".to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("qa_operation_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| format!("Failed to set operation latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Record one store call.
///
/// Metrics: `qa_store_operation_duration_seconds`, `qa_store_operations_total`
/// Labels: `operation`, `status`
pub fn record_store_operation(operation: &str, status: &str, duration: Duration) {
    histogram!("qa_store_operation_duration_seconds",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("qa_store_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record an orchestrator operation end to end.
///
/// Metric: `qa_operation_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_operation(operation: &str, status: &str, duration: Duration) {
    histogram!("qa_operation_duration_seconds",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Count a question put on the floor, by selector branch.
///
/// Metric: `qa_questions_selected_total`
/// Labels: `source`
pub fn record_question_selected(source: &str) {
    counter!("qa_questions_selected_total", "source" => source.to_string()).increment(1);
}

/// Metric: `qa_meetings_active`
pub fn set_meetings_active(count: usize) {
    // Safe for realistic meeting counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("qa_meetings_active").set(count as f64);
}

/// Metric: `qa_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("qa_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

/// Metric: `qa_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("qa_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_store_operation_records_histogram_and_counter() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_store_operation("commit", "success", Duration::from_millis(4));
            record_store_operation("commit", "error", Duration::from_millis(9));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counters: u64 = snapshot
            .iter()
            .filter(|(key, ..)| key.key().name() == "qa_store_operations_total")
            .map(|(.., value)| match value {
                DebugValue::Counter(n) => *n,
                _ => 0,
            })
            .sum();
        assert_eq!(counters, 2);
        assert!(snapshot
            .iter()
            .any(|(key, ..)| key.key().name() == "qa_store_operation_duration_seconds"));
    }

    #[test]
    fn test_selection_counter_is_labelled_by_source() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_question_selected("voice");
            record_question_selected("voice");
            record_question_selected("random");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let voice = snapshot
            .into_iter()
            .find(|(key, ..)| {
                key.key().name() == "qa_questions_selected_total"
                    && key.key().labels().any(|l| l.value() == "voice")
            })
            .map(|(.., value)| value);
        assert_eq!(voice, Some(DebugValue::Counter(2)));
    }

    #[test]
    fn test_gauges_do_not_panic_without_recorder() {
        set_meetings_active(3);
        set_actor_mailbox_depth("meeting", 12);
        record_actor_panic("meeting");
        record_operation("select_next", "success", Duration::from_millis(1));
    }
}
