//! Node actor mailbox monitoring and fleet counters.
//!
//! | Mailbox depth | Level    |
//! |---------------|----------|
//! | < 50          | Normal   |
//! | 50-200        | Warning  |
//! | > 200         | Critical |
//!
//! `FleetMetrics` keeps lock-free per-state node counts and the total number of
//! active usages so status snapshots never need to message every actor.

use crate::lifecycle::NodeState;
use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for node actors.
pub const NODE_MAILBOX_NORMAL: usize = 50;
pub const NODE_MAILBOX_WARNING: usize = 200;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor shared between a node actor and its handles.
///
/// Handles record the enqueue before sending; the actor records the dequeue
/// after handling, so `current_depth` counts in-flight messages. Every node's
/// monitor feeds the fleet-wide `mnm_actor_mailbox_depth` gauge, which drops
/// back as messages are handled or discarded.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Node identifier.
    node_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given node.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::increment_actor_mailbox_depth();

        let level = Self::level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "mnm.actor.mailbox",
                node_id = %self.node_id,
                depth = new_depth,
                threshold = NODE_MAILBOX_WARNING,
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == NODE_MAILBOX_NORMAL + 1 {
            // Log once when crossing into the warning band
            debug!(
                target: "mnm.actor.mailbox",
                node_id = %self.node_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message the actor never handled: the send failed, or the
    /// actor stopped with the message still queued.
    pub fn record_rejected(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        metrics::decrement_actor_mailbox_depth();
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        metrics::decrement_actor_mailbox_depth();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        Self::level_for_depth(self.current_depth())
    }

    fn level_for_depth(depth: usize) -> MailboxLevel {
        if depth > NODE_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > NODE_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Fleet-wide counters updated by node actors.
///
/// All fields are atomic for lock-free concurrent access.
#[derive(Debug, Default)]
pub struct FleetMetrics {
    launching: AtomicUsize,
    running: AtomicUsize,
    waiting_idle_to_terminate: AtomicUsize,
    terminating: AtomicUsize,
    canceled: AtomicUsize,
    active_usages: AtomicUsize,
}

/// Snapshot of fleet counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FleetSnapshot {
    pub launching: usize,
    pub running: usize,
    pub waiting_idle_to_terminate: usize,
    pub terminating: usize,
    pub canceled: usize,
    pub active_usages: usize,
}

impl FleetSnapshot {
    /// Total nodes tracked across all states.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.launching
            + self.running
            + self.waiting_idle_to_terminate
            + self.terminating
            + self.canceled
    }
}

impl FleetMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counter(&self, state: NodeState) -> &AtomicUsize {
        match state {
            NodeState::Launching => &self.launching,
            NodeState::Running => &self.running,
            NodeState::WaitingIdleToTerminate => &self.waiting_idle_to_terminate,
            NodeState::Terminating => &self.terminating,
            NodeState::Canceled => &self.canceled,
        }
    }

    /// A node started being tracked in `state`.
    pub fn node_added(&self, state: NodeState) {
        let count = self.counter(state).fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_nodes_in_state(state, count);
        metrics::set_nodes_tracked(self.snapshot().tracked());
    }

    /// A node moved from `from` to `to`.
    pub fn node_moved(&self, from: NodeState, to: NodeState) {
        let left = self.counter(from).fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        let entered = self.counter(to).fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_nodes_in_state(from, left);
        metrics::set_nodes_in_state(to, entered);
    }

    /// A node in `state` stopped being tracked.
    pub fn node_removed(&self, state: NodeState) {
        let left = self.counter(state).fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_nodes_in_state(state, left);
        metrics::set_nodes_tracked(self.snapshot().tracked());
    }

    pub fn usage_added(&self) {
        self.active_usages.fetch_add(1, Ordering::SeqCst);
    }

    pub fn usage_removed(&self) {
        self.active_usages.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of nodes currently in `state`.
    #[must_use]
    pub fn nodes_in(&self, state: NodeState) -> usize {
        self.counter(state).load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn active_usages(&self) -> usize {
        self.active_usages.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            launching: self.launching.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            waiting_idle_to_terminate: self.waiting_idle_to_terminate.load(Ordering::SeqCst),
            terminating: self.terminating.load(Ordering::SeqCst),
            canceled: self.canceled.load(Ordering::SeqCst),
            active_usages: self.active_usages.load(Ordering::SeqCst),
        }
    }
}
