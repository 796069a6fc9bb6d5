//! Metrics definitions for the media node manager.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mnm_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `state`: 5 values (lifecycle states)
//! - `transition`: 6 values (lifecycle edges)
//! - `event`: 2 values (register, deregister)
//! - `outcome`: bounded by error labels plus `success`
//! - `action`: 2 values (mark_idle, escalate)
//! - `operation`: bounded by code (launch, terminate, ...)
//!
//! Node and connection identifiers are never used as labels.

use crate::lifecycle::{NodeState, NodeTransition};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Idle scans walk every tracked node; expect low milliseconds
        .set_buckets_for_metric(
            Matcher::Prefix("mnm_idle_scan".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set idle scan buckets: {e}"))?
        // Provisioner calls are remote HTTP requests
        .set_buckets_for_metric(
            Matcher::Prefix("mnm_provisioner_request".to_string()),
            &[
                0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set provisioner request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Fleet Gauges
// ============================================================================

/// Set the number of tracked media nodes.
///
/// Metric: `mnm_nodes_tracked`
pub fn set_nodes_tracked(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mnm_nodes_tracked").set(count as f64);
}

/// Set the number of media nodes in a lifecycle state.
///
/// Metric: `mnm_nodes`
/// Labels: `state`
pub fn set_nodes_in_state(state: NodeState, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mnm_nodes", "state" => state.as_str()).set(count as f64);
}

/// Count one message queued for a node actor.
///
/// Metric: `mnm_actor_mailbox_depth` (messages queued across all node actors)
pub fn increment_actor_mailbox_depth() {
    gauge!("mnm_actor_mailbox_depth").increment(1.0);
}

/// Count one node actor message handled or discarded.
///
/// Metric: `mnm_actor_mailbox_depth`
pub fn decrement_actor_mailbox_depth() {
    gauge!("mnm_actor_mailbox_depth").decrement(1.0);
}

// ============================================================================
// Lifecycle Counters
// ============================================================================

/// Record a lifecycle transition that was applied.
///
/// Metric: `mnm_node_transitions_total`
/// Labels: `transition`
pub fn record_transition(transition: NodeTransition) {
    counter!("mnm_node_transitions_total", "transition" => transition.as_str()).increment(1);
}

/// Record a usage registration or deregistration.
///
/// Metric: `mnm_usage_events_total`
/// Labels: `event`, `outcome`
pub fn record_usage_event(event: &'static str, outcome: &'static str) {
    counter!("mnm_usage_events_total",
        "event" => event,
        "outcome" => outcome
    )
    .increment(1);
}

// ============================================================================
// Idle Reaper
// ============================================================================

/// Record one idle scan.
///
/// Metric: `mnm_idle_scan_duration_seconds`, `mnm_idle_scan_actions_total`
/// Labels: `action`
pub fn record_idle_scan(duration: Duration, marked_idle: usize, escalated: usize) {
    histogram!("mnm_idle_scan_duration_seconds").record(duration.as_secs_f64());

    if marked_idle > 0 {
        counter!("mnm_idle_scan_actions_total", "action" => "mark_idle")
            .increment(marked_idle as u64);
    }
    if escalated > 0 {
        counter!("mnm_idle_scan_actions_total", "action" => "escalate")
            .increment(escalated as u64);
    }
}

// ============================================================================
// Provisioner
// ============================================================================

/// Record an infra provisioner request.
///
/// Metric: `mnm_provisioner_requests_total`, `mnm_provisioner_request_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_provisioner_request(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("mnm_provisioner_request_duration_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());

    counter!("mnm_provisioner_requests_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Errors
// ============================================================================

/// Record an error by operation and error label.
///
/// Metric: `mnm_errors_total`
/// Labels: `operation`, `error_type`
pub fn record_error(operation: &'static str, error_type: &'static str) {
    counter!("mnm_errors_total",
        "operation" => operation,
        "error_type" => error_type
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        set_nodes_tracked(3);
        set_nodes_in_state(NodeState::Running, 2);
        increment_actor_mailbox_depth();
        decrement_actor_mailbox_depth();
        record_transition(NodeTransition::Ready);
        record_usage_event("register", "success");
        record_idle_scan(Duration::from_millis(2), 1, 0);
        record_provisioner_request("launch", "success", Duration::from_millis(40));
        record_error("registration", "invalid_state");
    }

    #[test]
    fn test_metrics_are_recorded_with_bounded_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_transition(NodeTransition::IdleTimeout);
            record_transition(NodeTransition::IdleTimeout);
            record_usage_event("register", "duplicate_usage");
            set_nodes_in_state(NodeState::WaitingIdleToTerminate, 1);
            record_idle_scan(Duration::from_millis(1), 2, 1);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let transitions = metrics
            .iter()
            .find(|(key, _, _, _)| {
                key.kind() == MetricKind::Counter
                    && key.key().name() == "mnm_node_transitions_total"
            })
            .expect("transition counter recorded");
        assert_eq!(transitions.3, DebugValue::Counter(2));
        assert!(transitions
            .0
            .key()
            .labels()
            .any(|l| l.key() == "transition" && l.value() == "idle_timeout"));

        let mark_idle = metrics
            .iter()
            .find(|(key, _, _, _)| {
                key.key().name() == "mnm_idle_scan_actions_total"
                    && key
                        .key()
                        .labels()
                        .any(|l| l.key() == "action" && l.value() == "mark_idle")
            })
            .expect("mark_idle counter recorded");
        assert_eq!(mark_idle.3, DebugValue::Counter(2));

        let waiting = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "mnm_nodes")
            .expect("state gauge recorded");
        assert!(waiting
            .0
            .key()
            .labels()
            .any(|l| l.value() == "WAITING_IDLE_TO_TERMINATE"));
    }
}
