//! Media node manager error types.
//!
//! Every lifecycle error is a local, recoverable condition reported to the
//! immediate caller. None of them indicate corrupted internal state: they
//! reflect a stale or racing view of a node and are resolved by re-reading it.
//!
//! Errors map to HTTP status codes via the `IntoResponse` impl for the
//! internal collaborator API.

use crate::lifecycle::{NodeState, NodeTransition};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Media node manager error type.
///
/// Maps to HTTP status codes:
/// - `InvalidNodeId`: 400 Bad Request
/// - `UnknownNode`, `UnknownUsage`: 404 Not Found
/// - `DuplicateUsage`, `NodeAlreadyTracked`, `InvalidState`, `IllegalTransition`: 409 Conflict
/// - `NotIdle`: 422 Unprocessable Entity
/// - `Provisioner`: 502 Bad Gateway
/// - `Config`, `Internal`: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum MnmError {
    /// The node identifier is empty or contains a URL delimiter.
    #[error("Invalid media node id: {0:?}")]
    InvalidNodeId(String),

    /// The node is not tracked (never requested, or already removed).
    #[error("Unknown media node: {0}")]
    UnknownNode(String),

    /// The connection is not registered on the node.
    #[error("Unknown usage {connection_id} on media node {node_id}")]
    UnknownUsage {
        node_id: String,
        connection_id: String,
    },

    /// The connection is already registered on the node.
    #[error("Usage {connection_id} already registered on media node {node_id}")]
    DuplicateUsage {
        node_id: String,
        connection_id: String,
    },

    /// A node with this identifier is already tracked.
    #[error("Media node already tracked: {0}")]
    NodeAlreadyTracked(String),

    /// The node's lifecycle state does not accept this operation.
    #[error("Media node {node_id} is {state} and cannot accept usages")]
    InvalidState { node_id: String, state: NodeState },

    /// The requested transition is not an edge of the lifecycle graph, or its
    /// guard failed.
    #[error("Illegal transition {transition} for media node {node_id} in state {from}")]
    IllegalTransition {
        node_id: String,
        from: NodeState,
        transition: NodeTransition,
    },

    /// A forced drop was attempted on a node that still has active usages.
    #[error("Media node {node_id} is not idle ({usage_count} active usages)")]
    NotIdle { node_id: String, usage_count: usize },

    /// The infra provisioner rejected or failed a request.
    #[error("Provisioner error: {0}")]
    Provisioner(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor channel closed, task failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MnmError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            MnmError::InvalidNodeId(_) => 400,
            MnmError::UnknownNode(_) | MnmError::UnknownUsage { .. } => 404,
            MnmError::DuplicateUsage { .. }
            | MnmError::NodeAlreadyTracked(_)
            | MnmError::InvalidState { .. }
            | MnmError::IllegalTransition { .. } => 409,
            MnmError::NotIdle { .. } => 422,
            MnmError::Provisioner(_) => 502,
            MnmError::Config(_) | MnmError::Internal(_) => 500,
        }
    }

    /// Returns a bounded label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            MnmError::InvalidNodeId(_) => "invalid_node_id",
            MnmError::UnknownNode(_) => "unknown_node",
            MnmError::UnknownUsage { .. } => "unknown_usage",
            MnmError::DuplicateUsage { .. } => "duplicate_usage",
            MnmError::NodeAlreadyTracked(_) => "node_already_tracked",
            MnmError::InvalidState { .. } => "invalid_state",
            MnmError::IllegalTransition { .. } => "illegal_transition",
            MnmError::NotIdle { .. } => "not_idle",
            MnmError::Provisioner(_) => "provisioner",
            MnmError::Config(_) => "config",
            MnmError::Internal(_) => "internal",
        }
    }

    /// Whether this error is the expected outcome of a race with a concurrent
    /// actor. Callers log these and re-read node state instead of failing.
    #[must_use]
    pub const fn is_race(&self) -> bool {
        matches!(
            self,
            MnmError::UnknownNode(_)
                | MnmError::UnknownUsage { .. }
                | MnmError::InvalidState { .. }
                | MnmError::IllegalTransition { .. }
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for MnmError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            MnmError::Provisioner(reason) => {
                tracing::warn!(target: "mnm.api", reason = %reason, "Provisioner request failed");
                "Infra provisioner request failed".to_string()
            }
            MnmError::Config(reason) | MnmError::Internal(reason) => {
                tracing::error!(target: "mnm.api", reason = %reason, "Internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.label().to_ascii_uppercase(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}
