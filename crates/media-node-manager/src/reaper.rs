//! Idle reaper.
//!
//! Two-stage idle teardown:
//! 1. `Running` with zero usages for `idle_grace_period` becomes
//!    `WaitingIdleToTerminate`.
//! 2. `WaitingIdleToTerminate` for `escalation_grace_period` (when enabled)
//!    becomes `Terminating` and infra is asked to tear the node down.
//!
//! Each node evaluates the policy inside its own actor, so the decision and
//! the transition see the same usage count.
//!
//! # Graceful Shutdown
//!
//! The background task exits when its cancellation token is triggered.

use crate::actors::{MediaNodeActorHandle, NodeSnapshot};
use crate::lifecycle::NodeState;
use crate::manager::MediaNodeManager;
use crate::observability::metrics;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Idle thresholds applied by the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Zero-usage time before a running node becomes a termination candidate.
    pub idle_grace_period: chrono::Duration,
    /// Waiting time before an idle node is dropped. `None` disables escalation.
    pub escalation_grace_period: Option<chrono::Duration>,
}

impl IdlePolicy {
    #[must_use]
    pub fn new(
        idle_grace_period: chrono::Duration,
        escalation_grace_period: Option<chrono::Duration>,
    ) -> Self {
        Self {
            idle_grace_period,
            escalation_grace_period,
        }
    }

    /// Decide what, if anything, should happen to a node at `now`.
    ///
    /// Nodes already past the target state are skipped, which keeps repeated
    /// scans idempotent.
    #[must_use]
    pub fn evaluate(&self, node: &NodeSnapshot, now: DateTime<Utc>) -> Option<IdleAction> {
        match node.state {
            NodeState::Running
                if node.usage_count == 0
                    && now - node.last_activity_at >= self.idle_grace_period =>
            {
                Some(IdleAction::MarkIdle)
            }
            NodeState::WaitingIdleToTerminate => {
                let escalation = self.escalation_grace_period?;
                (now - node.state_entered_at >= escalation).then_some(IdleAction::Escalate)
            }
            _ => None,
        }
    }
}

/// Action taken on a node by an idle scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// `Running` to `WaitingIdleToTerminate`.
    MarkIdle,
    /// `WaitingIdleToTerminate` to `Terminating`.
    Escalate,
}

/// Summary of one idle scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Nodes visited (nodes removed mid-scan are not counted).
    pub scanned: usize,
    pub marked_idle: usize,
    /// Node IDs escalated to `Terminating`.
    pub escalated: Vec<String>,
}

/// Evaluate `policy` on every node handle.
///
/// Handles whose actor has already stopped are skipped.
pub(crate) async fn scan_nodes(
    handles: Vec<MediaNodeActorHandle>,
    policy: IdlePolicy,
    now: DateTime<Utc>,
) -> ScanReport {
    let started = std::time::Instant::now();

    let outcomes = join_all(handles.iter().map(|handle| async move {
        (handle.node_id(), handle.evaluate_idle(policy, now).await)
    }))
    .await;

    let mut report = ScanReport::default();
    for (node_id, outcome) in outcomes {
        match outcome {
            Ok(Some(IdleAction::MarkIdle)) => {
                report.scanned += 1;
                report.marked_idle += 1;
            }
            Ok(Some(IdleAction::Escalate)) => {
                report.scanned += 1;
                report.escalated.push(node_id.to_string());
            }
            Ok(None) => report.scanned += 1,
            Err(e) => {
                debug!(
                    target: "mnm.task.idle_reaper",
                    node_id = %node_id,
                    error = %e,
                    "Skipping node removed during scan"
                );
            }
        }
    }

    metrics::record_idle_scan(
        started.elapsed(),
        report.marked_idle,
        report.escalated.len(),
    );

    report
}

/// Wall clock derived from tokio's monotonic clock.
///
/// Keeps scan timestamps monotonic and lets paused-time tests drive the
/// reaper with `tokio::time::advance`.
#[derive(Debug, Clone, Copy)]
struct ReaperClock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl ReaperClock {
    fn start() -> Self {
        Self {
            wall_origin: Utc::now(),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed =
            chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }
}

/// Background task that periodically scans the manager's nodes.
pub struct IdleReaper {
    manager: MediaNodeManager,
    interval: Duration,
}

impl IdleReaper {
    #[must_use]
    pub fn new(manager: MediaNodeManager, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run until `cancel_token` is triggered.
    ///
    /// Scans on every interval tick. When a deregistration drops a node to
    /// zero usages, an extra scan is armed for when its idle grace period
    /// runs out.
    #[instrument(skip_all, name = "mnm.task.idle_reaper")]
    pub async fn run(self, cancel_token: CancellationToken) {
        let policy = self.manager.idle_policy();
        let grace = policy.idle_grace_period.to_std().unwrap_or_default();
        let idle_hint = self.manager.idle_hint();
        let clock = ReaperClock::start();

        info!(
            target: "mnm.task.idle_reaper",
            interval_ms = self.interval.as_millis() as u64,
            idle_grace_seconds = policy.idle_grace_period.num_seconds(),
            escalation_grace_seconds = policy.escalation_grace_period.map(|d| d.num_seconds()),
            "Starting idle reaper task"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut deferred: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.scan(clock.now()).await;
                }
                () = tokio::time::sleep_until(deferred.unwrap_or_else(Instant::now)), if deferred.is_some() => {
                    deferred = None;
                    self.scan(clock.now()).await;
                }
                () = idle_hint.notified() => {
                    // Grace is measured from the last disconnect; allow for clock granularity
                    let due = Instant::now() + grace + Duration::from_millis(1);
                    deferred = Some(deferred.map_or(due, |current| current.min(due)));
                }
                () = cancel_token.cancelled() => {
                    info!(
                        target: "mnm.task.idle_reaper",
                        "Idle reaper received shutdown signal, exiting"
                    );
                    break;
                }
            }
        }

        info!(target: "mnm.task.idle_reaper", "Idle reaper stopped");
    }

    async fn scan(&self, now: DateTime<Utc>) {
        let report = self.manager.scan_idle(now).await;
        if report.marked_idle > 0 || !report.escalated.is_empty() {
            info!(
                target: "mnm.task.idle_reaper",
                scanned = report.scanned,
                marked_idle = report.marked_idle,
                escalated = report.escalated.len(),
                "Idle scan applied transitions"
            );
        }
    }
}
