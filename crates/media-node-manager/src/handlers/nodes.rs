//! Internal collaborator API: infra callbacks, signaling events and operator
//! commands.
//!
//! No node status endpoint is exposed.

use crate::errors::MnmError;
use crate::lifecycle::NodeState;
use crate::models::{
    DeregisterUsageQuery, LaunchNodeRequest, NodeStateResponse, RegisterUsageRequest,
    TransitionRequest, UsageResponse,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

fn state_response(node_id: String, state: Option<NodeState>) -> Json<NodeStateResponse> {
    Json(NodeStateResponse { node_id, state })
}

/// Handler for POST /internal/v1/nodes
///
/// Starts tracking the node and asks infra to launch it. Returns 202 since
/// infra reports readiness later.
#[instrument(skip_all, name = "mnm.api.launch_node", fields(node_id = %request.node_id))]
pub async fn launch_node(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LaunchNodeRequest>,
) -> Result<(StatusCode, Json<NodeStateResponse>), MnmError> {
    let requested_at = request.requested_at.unwrap_or_else(Utc::now);
    state
        .manager
        .launch_node(&request.node_id, requested_at)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        state_response(request.node_id, Some(NodeState::Launching)),
    ))
}

/// Handler for POST /internal/v1/nodes/:id/ready
#[instrument(skip_all, name = "mnm.api.node_ready", fields(node_id = %node_id))]
pub async fn node_ready(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<NodeStateResponse>, MnmError> {
    let at = body.and_then(|Json(b)| b.at).unwrap_or_else(Utc::now);
    state.manager.node_ready(&node_id, at).await?;

    Ok(state_response(node_id, Some(NodeState::Running)))
}

/// Handler for POST /internal/v1/nodes/:id/cancel
#[instrument(skip_all, name = "mnm.api.cancel_launch", fields(node_id = %node_id))]
pub async fn cancel_launch(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<NodeStateResponse>, MnmError> {
    let at = body.and_then(|Json(b)| b.at).unwrap_or_else(Utc::now);
    state.manager.cancel_launch(&node_id, at).await?;

    Ok(state_response(node_id, Some(NodeState::Canceled)))
}

/// Handler for POST /internal/v1/nodes/:id/confirmed
#[instrument(skip_all, name = "mnm.api.confirm_removal", fields(node_id = %node_id))]
pub async fn confirm_removal(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeStateResponse>, MnmError> {
    state.manager.confirm_removal(&node_id).await?;

    Ok(state_response(node_id, None))
}

/// Handler for POST /internal/v1/nodes/:id/usages
#[instrument(skip_all, name = "mnm.api.register_usage", fields(node_id = %node_id))]
pub async fn register_usage(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(request): Json<RegisterUsageRequest>,
) -> Result<(StatusCode, Json<UsageResponse>), MnmError> {
    let connected_at = request.connected_at.unwrap_or_else(Utc::now);
    let update = state
        .manager
        .media_node_usage_registration(&node_id, &request.connection_id, connected_at)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UsageResponse {
            node_id,
            connection_id: request.connection_id,
            usage_count: update.usage_count,
            reactivated: update.reactivated,
        }),
    ))
}

/// Handler for DELETE /internal/v1/nodes/:id/usages/:connection_id
#[instrument(skip_all, name = "mnm.api.deregister_usage", fields(node_id = %node_id))]
pub async fn deregister_usage(
    State(state): State<Arc<AppState>>,
    Path((node_id, connection_id)): Path<(String, String)>,
    Query(query): Query<DeregisterUsageQuery>,
) -> Result<Json<UsageResponse>, MnmError> {
    let disconnected_at = query.disconnected_at.unwrap_or_else(Utc::now);
    let usage_count = state
        .manager
        .media_node_usage_deregistration(&node_id, &connection_id, disconnected_at)
        .await?;

    Ok(Json(UsageResponse {
        node_id,
        connection_id,
        usage_count,
        reactivated: false,
    }))
}

/// Handler for POST /internal/v1/nodes/:id/drop
///
/// Operator scale-down. Fails with 422 if the node still has usages.
#[instrument(skip_all, name = "mnm.api.drop_idle_node", fields(node_id = %node_id))]
pub async fn drop_idle_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeStateResponse>, MnmError> {
    state.manager.drop_idle_media_node(&node_id).await?;

    Ok(state_response(node_id, Some(NodeState::Terminating)))
}
