//! Media node lifecycle states and the legal transition graph.
//!
//! ```text
//! (none) --request--> LAUNCHING
//! LAUNCHING --ready--> RUNNING
//! LAUNCHING --cancel--> CANCELED
//! RUNNING --idle_timeout--> WAITING_IDLE_TO_TERMINATE   [usages == 0]
//! RUNNING --drop_requested--> TERMINATING               [usages == 0]
//! WAITING_IDLE_TO_TERMINATE --reactivate--> RUNNING     [usages > 0]
//! WAITING_IDLE_TO_TERMINATE --drop_requested--> TERMINATING
//! TERMINATING --confirmed--> (removed)
//! CANCELED --confirmed--> (removed)
//! ```
//!
//! This module is pure: it decides whether an edge exists. Owning and
//! mutating node state is the job of the node actor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a media node. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Requested from infra, not yet accepting connections.
    Launching,
    /// Accepting connections.
    Running,
    /// Running with zero usages for at least the idle grace period.
    WaitingIdleToTerminate,
    /// Teardown requested from infra. Accepts no new usages.
    Terminating,
    /// Launch aborted before the node became ready.
    Canceled,
}

impl NodeState {
    /// Returns the state as a static string (used for logs and metric labels).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NodeState::Launching => "LAUNCHING",
            NodeState::Running => "RUNNING",
            NodeState::WaitingIdleToTerminate => "WAITING_IDLE_TO_TERMINATE",
            NodeState::Terminating => "TERMINATING",
            NodeState::Canceled => "CANCELED",
        }
    }

    /// Whether the only remaining step for this node is removal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Terminating | NodeState::Canceled)
    }

    /// Whether a new usage may be registered in this state.
    ///
    /// A waiting node accepts usages by reactivating first.
    #[must_use]
    pub const fn accepts_usages(&self) -> bool {
        matches!(self, NodeState::Running | NodeState::WaitingIdleToTerminate)
    }

    /// Resolve `transition` from this state given the node's usage count.
    ///
    /// Returns `None` when the edge does not exist or its guard fails.
    #[must_use]
    pub const fn next(self, transition: NodeTransition, usage_count: usize) -> Option<NextState> {
        use NodeState::{Canceled, Launching, Running, Terminating, WaitingIdleToTerminate};
        use NodeTransition::{Cancel, Confirmed, DropRequested, IdleTimeout, Reactivate, Ready};

        match (self, transition) {
            (Launching, Ready) => Some(NextState::State(Running)),
            (Launching, Cancel) => Some(NextState::State(Canceled)),
            (Running, IdleTimeout) if usage_count == 0 => {
                Some(NextState::State(WaitingIdleToTerminate))
            }
            (Running, DropRequested) if usage_count == 0 => Some(NextState::State(Terminating)),
            (WaitingIdleToTerminate, Reactivate) if usage_count > 0 => {
                Some(NextState::State(Running))
            }
            (WaitingIdleToTerminate, DropRequested) => Some(NextState::State(Terminating)),
            (Terminating | Canceled, Confirmed) => Some(NextState::Removed),
            _ => None,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edges of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTransition {
    /// Infra reports the node is ready for connections.
    Ready,
    /// Launch aborted (provisioning failed or preempted by policy).
    Cancel,
    /// Idle grace period elapsed with zero usages.
    IdleTimeout,
    /// Teardown requested (operator drop or escalation).
    DropRequested,
    /// New traffic arrived on a waiting node.
    Reactivate,
    /// Infra confirms termination or cancellation is final.
    Confirmed,
}

impl NodeTransition {
    /// Returns the transition as a static string (used for logs and metric labels).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NodeTransition::Ready => "ready",
            NodeTransition::Cancel => "cancel",
            NodeTransition::IdleTimeout => "idle_timeout",
            NodeTransition::DropRequested => "drop_requested",
            NodeTransition::Reactivate => "reactivate",
            NodeTransition::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for NodeTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    /// The node moves to this state.
    State(NodeState),
    /// The node leaves the table.
    Removed,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [NodeState; 5] = [
        NodeState::Launching,
        NodeState::Running,
        NodeState::WaitingIdleToTerminate,
        NodeState::Terminating,
        NodeState::Canceled,
    ];

    const ALL_TRANSITIONS: [NodeTransition; 6] = [
        NodeTransition::Ready,
        NodeTransition::Cancel,
        NodeTransition::IdleTimeout,
        NodeTransition::DropRequested,
        NodeTransition::Reactivate,
        NodeTransition::Confirmed,
    ];

    #[test]
    fn test_launching_edges() {
        assert_eq!(
            NodeState::Launching.next(NodeTransition::Ready, 0),
            Some(NextState::State(NodeState::Running))
        );
        assert_eq!(
            NodeState::Launching.next(NodeTransition::Cancel, 0),
            Some(NextState::State(NodeState::Canceled))
        );
        assert_eq!(NodeState::Launching.next(NodeTransition::Confirmed, 0), None);
        assert_eq!(
            NodeState::Launching.next(NodeTransition::DropRequested, 0),
            None
        );
    }

    #[test]
    fn test_running_edges_are_guarded_by_usage() {
        assert_eq!(
            NodeState::Running.next(NodeTransition::IdleTimeout, 0),
            Some(NextState::State(NodeState::WaitingIdleToTerminate))
        );
        assert_eq!(NodeState::Running.next(NodeTransition::IdleTimeout, 1), None);
        assert_eq!(
            NodeState::Running.next(NodeTransition::DropRequested, 0),
            Some(NextState::State(NodeState::Terminating))
        );
        assert_eq!(
            NodeState::Running.next(NodeTransition::DropRequested, 4),
            None
        );
    }

    #[test]
    fn test_waiting_edges() {
        assert_eq!(
            NodeState::WaitingIdleToTerminate.next(NodeTransition::Reactivate, 1),
            Some(NextState::State(NodeState::Running))
        );
        assert_eq!(
            NodeState::WaitingIdleToTerminate.next(NodeTransition::Reactivate, 0),
            None
        );
        assert_eq!(
            NodeState::WaitingIdleToTerminate.next(NodeTransition::DropRequested, 0),
            Some(NextState::State(NodeState::Terminating))
        );
        assert_eq!(
            NodeState::WaitingIdleToTerminate.next(NodeTransition::IdleTimeout, 0),
            None
        );
    }

    #[test]
    fn test_terminal_states_only_allow_confirmation() {
        for state in [NodeState::Terminating, NodeState::Canceled] {
            assert!(state.is_terminal());
            for transition in ALL_TRANSITIONS {
                let expected = if transition == NodeTransition::Confirmed {
                    Some(NextState::Removed)
                } else {
                    None
                };
                assert_eq!(
                    state.next(transition, 0),
                    expected,
                    "{state} --{transition}-->"
                );
            }
        }
    }

    #[test]
    fn test_nothing_reaches_launching() {
        for state in ALL_STATES {
            for transition in ALL_TRANSITIONS {
                for usage in [0, 1] {
                    assert_ne!(
                        state.next(transition, usage),
                        Some(NextState::State(NodeState::Launching))
                    );
                }
            }
        }
    }

    #[test]
    fn test_accepts_usages() {
        assert!(NodeState::Running.accepts_usages());
        assert!(NodeState::WaitingIdleToTerminate.accepts_usages());
        assert!(!NodeState::Launching.accepts_usages());
        assert!(!NodeState::Terminating.accepts_usages());
        assert!(!NodeState::Canceled.accepts_usages());
    }

    #[test]
    fn test_display_and_serialization() {
        assert_eq!(
            NodeState::WaitingIdleToTerminate.to_string(),
            "WAITING_IDLE_TO_TERMINATE"
        );
        assert_eq!(NodeTransition::DropRequested.to_string(), "drop_requested");
        assert_eq!(
            serde_json::to_string(&NodeState::Running).unwrap_or_default(),
            "\"RUNNING\""
        );
    }
}
