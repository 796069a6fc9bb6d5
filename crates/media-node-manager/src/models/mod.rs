//! Request and response bodies for the internal collaborator API.
//!
//! Timestamps are optional on input; the handler substitutes the time the
//! request was received.

use crate::lifecycle::NodeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `POST /internal/v1/nodes`
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchNodeRequest {
    pub node_id: String,
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
}

/// Optional body of `ready` and `cancel` callbacks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionRequest {
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// `POST /internal/v1/nodes/:id/usages`
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUsageRequest {
    pub connection_id: String,
    #[serde(default)]
    pub connected_at: Option<DateTime<Utc>>,
}

/// Query of `DELETE /internal/v1/nodes/:id/usages/:connection_id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeregisterUsageQuery {
    #[serde(default)]
    pub disconnected_at: Option<DateTime<Utc>>,
}

/// Node state after a lifecycle command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStateResponse {
    pub node_id: String,
    /// `None` once the node has left the table.
    pub state: Option<NodeState>,
}

/// Usage count after a registration or deregistration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageResponse {
    pub node_id: String,
    pub connection_id: String,
    pub usage_count: usize,
    /// Set when the registration reactivated an idle node.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reactivated: bool,
}
