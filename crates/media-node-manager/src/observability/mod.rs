//! Observability for the media node manager.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Node and connection identifiers appear in spans and logs, never in metric
//! labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mnm_nodes_tracked` | Gauge | none | Nodes in the table |
//! | `mnm_nodes` | Gauge | `state` | Nodes per lifecycle state |
//! | `mnm_node_transitions_total` | Counter | `transition` | Applied lifecycle edges |
//! | `mnm_usage_events_total` | Counter | `event`, `outcome` | Usage registration results |
//! | `mnm_idle_scan_duration_seconds` | Histogram | none | Reaper scan time |
//! | `mnm_idle_scan_actions_total` | Counter | `action` | Idle marks and escalations |
//! | `mnm_provisioner_requests_total` | Counter | `operation`, `status` | Infra calls |
//! | `mnm_errors_total` | Counter | `operation`, `error_type` | Failed operations |
//! | `mnm_actor_mailbox_depth` | Gauge | none | Messages queued across all node actors |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
