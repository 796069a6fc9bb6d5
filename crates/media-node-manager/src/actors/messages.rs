//! Message types for node actor communication.
//!
//! Every request carries a `oneshot` reply channel; the node actor handles
//! messages one at a time, which is what linearizes operations on a node.

use crate::errors::MnmError;
use crate::lifecycle::{NextState, NodeState, NodeTransition};
use crate::reaper::{IdleAction, IdlePolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages sent to a `MediaNodeActor`.
#[derive(Debug)]
pub enum NodeMessage {
    /// A client connection started using the node.
    RegisterUsage {
        connection_id: String,
        connected_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<UsageUpdate, MnmError>>,
    },

    /// A client connection stopped using the node.
    DeregisterUsage {
        connection_id: String,
        disconnected_at: DateTime<Utc>,
        /// Response channel for the remaining usage count.
        respond_to: oneshot::Sender<Result<usize, MnmError>>,
    },

    /// Apply a lifecycle edge.
    Transition {
        transition: NodeTransition,
        at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<NextState, MnmError>>,
    },

    /// Evaluate the idle policy and apply its action in the same step.
    EvaluateIdle {
        policy: IdlePolicy,
        now: DateTime<Utc>,
        /// Response channel for the action taken, if any.
        respond_to: oneshot::Sender<Option<IdleAction>>,
    },

    /// Read a consistent snapshot of the node.
    GetSnapshot {
        respond_to: oneshot::Sender<NodeSnapshot>,
    },
}

/// Outcome of a successful usage registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageUpdate {
    /// Usage count after the registration.
    pub usage_count: usize,
    /// Whether the node was reactivated from `WaitingIdleToTerminate`.
    pub reactivated: bool,
}

/// Point-in-time view of a media node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub state: NodeState,
    pub usage_count: usize,
    /// When the node was first requested.
    pub created_at: DateTime<Utc>,
    /// Latest of: ready time, connect times, disconnect times.
    pub last_activity_at: DateTime<Utc>,
    /// When the node entered its current state.
    pub state_entered_at: DateTime<Utc>,
}
