//! `MediaNodeManager` - facade over the node table.
//!
//! The manager owns the table of node actors and composes the usage ledger,
//! the lifecycle graph and the idle policy into the public operations:
//!
//! - signaling layer: usage registration and deregistration
//! - operator: the five state predicates and `drop_idle_media_node`
//! - infra collaborator: `request_node`/`launch_node`, `node_ready`,
//!   `cancel_launch`, `confirm_removal`
//!
//! The table lock is held only for map operations, never across an actor
//! round-trip. Infra requests run in spawned tasks.

use crate::actors::{FleetMetrics, FleetSnapshot, MediaNodeActor, MediaNodeActorHandle, NodeSnapshot, UsageUpdate};
use crate::errors::MnmError;
use crate::lifecycle::{NextState, NodeState, NodeTransition};
use crate::observability::metrics;
use crate::provisioner::NodeProvisioner;
use crate::reaper::{self, IdlePolicy, ScanReport};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Node IDs travel as URL path segments to infra and back.
fn validate_node_id(node_id: &str) -> Result<(), MnmError> {
    if node_id.is_empty() || node_id.contains(['/', '?', '#']) {
        return Err(MnmError::InvalidNodeId(node_id.to_string()));
    }
    Ok(())
}

/// Cloneable handle to the media node manager.
#[derive(Clone)]
pub struct MediaNodeManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    nodes: RwLock<HashMap<String, MediaNodeActorHandle>>,
    provisioner: Arc<dyn NodeProvisioner>,
    policy: IdlePolicy,
    /// Woken when a node's usage count drops to zero.
    idle_hint: Arc<Notify>,
    fleet: Arc<FleetMetrics>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for MediaNodeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaNodeManager")
            .field("policy", &self.inner.policy)
            .field("fleet", &self.inner.fleet.snapshot())
            .finish_non_exhaustive()
    }
}

impl MediaNodeManager {
    /// Create a manager with its own root cancellation token.
    #[must_use]
    pub fn new(provisioner: Arc<dyn NodeProvisioner>, policy: IdlePolicy) -> Self {
        Self::with_cancel_token(provisioner, policy, CancellationToken::new())
    }

    /// Create a manager whose node actors are children of `cancel_token`.
    #[must_use]
    pub fn with_cancel_token(
        provisioner: Arc<dyn NodeProvisioner>,
        policy: IdlePolicy,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                nodes: RwLock::new(HashMap::new()),
                provisioner,
                policy,
                idle_hint: Arc::new(Notify::new()),
                fleet: FleetMetrics::new(),
                cancel_token,
            }),
        }
    }

    #[must_use]
    pub fn idle_policy(&self) -> IdlePolicy {
        self.inner.policy
    }

    /// Notification fired when a deregistration leaves a node with no usages.
    #[must_use]
    pub fn idle_hint(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.idle_hint)
    }

    /// Lock-free fleet counters.
    #[must_use]
    pub fn fleet(&self) -> FleetSnapshot {
        self.inner.fleet.snapshot()
    }

    async fn find(&self, node_id: &str) -> Option<MediaNodeActorHandle> {
        self.inner.nodes.read().await.get(node_id).cloned()
    }

    async fn handle(&self, node_id: &str) -> Result<MediaNodeActorHandle, MnmError> {
        self.find(node_id)
            .await
            .ok_or_else(|| MnmError::UnknownNode(node_id.to_string()))
    }

    /// Drop the table entry for `handle`, unless it was replaced meanwhile.
    async fn remove_entry(&self, handle: &MediaNodeActorHandle) {
        let mut nodes = self.inner.nodes.write().await;
        if nodes
            .get(handle.node_id())
            .is_some_and(|current| current.same_actor(handle))
        {
            nodes.remove(handle.node_id());
            metrics::set_nodes_tracked(nodes.len());
        }
    }

    // ------------------------------------------------------------------------
    // Infra collaborator entry points
    // ------------------------------------------------------------------------

    /// Start tracking `node_id` in `Launching`.
    ///
    /// # Errors
    ///
    /// - `InvalidNodeId` if the ID is empty or contains `/`, `?` or `#`
    /// - `NodeAlreadyTracked` if a live node with this ID is in the table
    #[instrument(skip_all, name = "mnm.manager.request_node", fields(node_id = %node_id))]
    pub async fn request_node(
        &self,
        node_id: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<(), MnmError> {
        validate_node_id(node_id).inspect_err(|e| {
            metrics::record_error("request_node", e.label());
        })?;

        let mut nodes = self.inner.nodes.write().await;

        if nodes.get(node_id).is_some_and(|existing| !existing.is_closed()) {
            metrics::record_error("request_node", "node_already_tracked");
            return Err(MnmError::NodeAlreadyTracked(node_id.to_string()));
        }

        let (handle, _task) = MediaNodeActor::spawn(
            node_id.to_string(),
            requested_at,
            self.inner.cancel_token.child_token(),
            Arc::clone(&self.inner.fleet),
        );
        nodes.insert(node_id.to_string(), handle);
        metrics::set_nodes_tracked(nodes.len());

        info!(target: "mnm.manager", node_id = %node_id, "Media node requested");
        Ok(())
    }

    /// Track `node_id` and ask infra to launch it.
    ///
    /// If infra rejects the launch, the node is canceled and forgotten since
    /// nothing was provisioned.
    ///
    /// # Errors
    ///
    /// Same as [`Self::request_node`].
    pub async fn launch_node(
        &self,
        node_id: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<(), MnmError> {
        self.request_node(node_id, requested_at).await?;

        let manager = self.clone();
        let node_id = node_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = manager.inner.provisioner.request_launch(&node_id).await {
                metrics::record_error("request_launch", e.label());
                warn!(
                    target: "mnm.manager",
                    node_id = %node_id,
                    error = %e,
                    "Launch request failed, forgetting node"
                );
                manager.forget_launch(&node_id).await;
            }
        });

        Ok(())
    }

    async fn forget_launch(&self, node_id: &str) {
        let Some(handle) = self.find(node_id).await else {
            return;
        };

        let now = Utc::now();
        let result = match handle.transition(NodeTransition::Cancel, now).await {
            Ok(_) => handle.transition(NodeTransition::Confirmed, now).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => self.remove_entry(&handle).await,
            Err(e) => {
                // Infra reported ready (or canceled) in the meantime
                debug!(
                    target: "mnm.manager",
                    node_id = %node_id,
                    error = %e,
                    "Node moved on before failed launch was forgotten"
                );
            }
        }
    }

    /// Infra reports the node ready: `Launching` to `Running`.
    ///
    /// # Errors
    ///
    /// `UnknownNode`, or `IllegalTransition` if the node is not launching.
    #[instrument(skip_all, name = "mnm.manager.node_ready", fields(node_id = %node_id))]
    pub async fn node_ready(&self, node_id: &str, at: DateTime<Utc>) -> Result<(), MnmError> {
        self.transition(node_id, NodeTransition::Ready, at, "node_ready")
            .await
            .map(|_| ())
    }

    /// Abort a launch: `Launching` to `Canceled`.
    ///
    /// Infra is asked to release whatever was partially provisioned.
    ///
    /// # Errors
    ///
    /// `UnknownNode`, or `IllegalTransition` if the node is not launching.
    #[instrument(skip_all, name = "mnm.manager.cancel_launch", fields(node_id = %node_id))]
    pub async fn cancel_launch(&self, node_id: &str, at: DateTime<Utc>) -> Result<(), MnmError> {
        self.transition(node_id, NodeTransition::Cancel, at, "cancel_launch")
            .await?;
        self.spawn_termination(node_id.to_string());
        Ok(())
    }

    /// Infra confirms termination or cancellation; the node leaves the table.
    ///
    /// # Errors
    ///
    /// `UnknownNode` if the node is not tracked (including a second
    /// confirmation), `IllegalTransition` if it is neither terminating nor
    /// canceled.
    #[instrument(skip_all, name = "mnm.manager.confirm_removal", fields(node_id = %node_id))]
    pub async fn confirm_removal(&self, node_id: &str) -> Result<(), MnmError> {
        let handle = self.handle(node_id).await.inspect_err(|e| {
            self.observe_failure("confirm_removal", node_id, e);
        })?;

        match handle.transition(NodeTransition::Confirmed, Utc::now()).await {
            Ok(NextState::Removed) => {
                self.remove_entry(&handle).await;
                info!(target: "mnm.manager", node_id = %node_id, "Media node removed");
                Ok(())
            }
            Ok(NextState::State(state)) => Err(MnmError::Internal(format!(
                "confirmed transition left node {node_id} in {state}"
            ))),
            Err(e) => {
                if matches!(e, MnmError::UnknownNode(_)) {
                    // Actor already stopped; drop the stale entry
                    self.remove_entry(&handle).await;
                }
                self.observe_failure("confirm_removal", node_id, &e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Signaling layer
    // ------------------------------------------------------------------------

    /// A client connection started on `node_id`.
    ///
    /// A waiting node is reactivated to `Running` before the usage is counted.
    ///
    /// # Errors
    ///
    /// - `UnknownNode` if the node is not tracked
    /// - `InvalidState` if the node is launching, terminating or canceled
    /// - `DuplicateUsage` if `connection_id` is already registered
    #[instrument(skip_all, name = "mnm.manager.register_usage", fields(node_id = %node_id))]
    pub async fn media_node_usage_registration(
        &self,
        node_id: &str,
        connection_id: &str,
        connected_at: DateTime<Utc>,
    ) -> Result<UsageUpdate, MnmError> {
        let result = match self.handle(node_id).await {
            Ok(handle) => {
                handle
                    .register_usage(connection_id.to_string(), connected_at)
                    .await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(update) => {
                metrics::record_usage_event("register", "success");
                if update.reactivated {
                    info!(
                        target: "mnm.manager",
                        node_id = %node_id,
                        connection_id = %connection_id,
                        "Idle media node reactivated by new usage"
                    );
                }
            }
            Err(e) => {
                metrics::record_usage_event("register", e.label());
                self.observe_failure("register_usage", node_id, e);
            }
        }

        result
    }

    /// A client connection stopped on `node_id`. Returns the remaining count.
    ///
    /// Never transitions the node; idle detection belongs to the reaper.
    ///
    /// # Errors
    ///
    /// `UnknownNode`, or `UnknownUsage` if the connection is not registered.
    #[instrument(skip_all, name = "mnm.manager.deregister_usage", fields(node_id = %node_id))]
    pub async fn media_node_usage_deregistration(
        &self,
        node_id: &str,
        connection_id: &str,
        disconnected_at: DateTime<Utc>,
    ) -> Result<usize, MnmError> {
        let result = match self.handle(node_id).await {
            Ok(handle) => {
                handle
                    .deregister_usage(connection_id.to_string(), disconnected_at)
                    .await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(remaining) => {
                metrics::record_usage_event("deregister", "success");
                if *remaining == 0 {
                    self.inner.idle_hint.notify_one();
                }
            }
            Err(e) => {
                metrics::record_usage_event("deregister", e.label());
                self.observe_failure("deregister_usage", node_id, e);
            }
        }

        result
    }

    // ------------------------------------------------------------------------
    // Operator
    // ------------------------------------------------------------------------

    /// Force an idle node to `Terminating`, bypassing grace periods, and ask
    /// infra to tear it down.
    ///
    /// # Errors
    ///
    /// - `UnknownNode` if the node is not tracked
    /// - `NotIdle` if the node has active usages (state unchanged)
    /// - `IllegalTransition` if the node is launching, terminating or canceled
    #[instrument(skip_all, name = "mnm.manager.drop_idle", fields(node_id = %node_id))]
    pub async fn drop_idle_media_node(&self, node_id: &str) -> Result<(), MnmError> {
        self.transition(
            node_id,
            NodeTransition::DropRequested,
            Utc::now(),
            "drop_idle_media_node",
        )
        .await?;

        info!(target: "mnm.manager", node_id = %node_id, "Idle media node dropped");
        self.spawn_termination(node_id.to_string());
        Ok(())
    }

    /// Current state, or `None` for an untracked node.
    pub async fn node_state(&self, node_id: &str) -> Option<NodeState> {
        let handle = self.find(node_id).await?;
        handle.snapshot().await.ok().map(|snapshot| snapshot.state)
    }

    pub async fn is_launching(&self, node_id: &str) -> bool {
        self.node_state(node_id).await == Some(NodeState::Launching)
    }

    pub async fn is_canceled(&self, node_id: &str) -> bool {
        self.node_state(node_id).await == Some(NodeState::Canceled)
    }

    pub async fn is_running(&self, node_id: &str) -> bool {
        self.node_state(node_id).await == Some(NodeState::Running)
    }

    pub async fn is_terminating(&self, node_id: &str) -> bool {
        self.node_state(node_id).await == Some(NodeState::Terminating)
    }

    pub async fn is_waiting_idle_to_terminate(&self, node_id: &str) -> bool {
        self.node_state(node_id).await == Some(NodeState::WaitingIdleToTerminate)
    }

    /// Active usages on `node_id`; 0 for an untracked node.
    pub async fn usage_count(&self, node_id: &str) -> usize {
        match self.find(node_id).await {
            Some(handle) => handle
                .snapshot()
                .await
                .map(|snapshot| snapshot.usage_count)
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Consistent snapshot of one node.
    ///
    /// # Errors
    ///
    /// `UnknownNode` if the node is not tracked.
    pub async fn node_snapshot(&self, node_id: &str) -> Result<NodeSnapshot, MnmError> {
        self.handle(node_id).await?.snapshot().await
    }

    /// Snapshots of every tracked node, sorted by node ID.
    pub async fn list_nodes(&self) -> Vec<NodeSnapshot> {
        let handles: Vec<_> = self.inner.nodes.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(snapshot) = handle.snapshot().await {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        snapshots
    }

    pub async fn node_count(&self) -> usize {
        self.inner.nodes.read().await.len()
    }

    // ------------------------------------------------------------------------
    // Reaper and shutdown
    // ------------------------------------------------------------------------

    /// Run one idle scan at `now` and request termination of escalated nodes.
    pub async fn scan_idle(&self, now: DateTime<Utc>) -> ScanReport {
        let handles: Vec<_> = self.inner.nodes.read().await.values().cloned().collect();

        let report = reaper::scan_nodes(handles, self.inner.policy, now).await;

        for node_id in &report.escalated {
            info!(
                target: "mnm.manager",
                node_id = %node_id,
                "Idle media node escalated to termination"
            );
            self.spawn_termination(node_id.clone());
        }

        report
    }

    /// Stop every node actor and clear the table.
    pub async fn shutdown(&self) {
        self.inner.cancel_token.cancel();
        let mut nodes = self.inner.nodes.write().await;
        let count = nodes.len();
        nodes.clear();
        metrics::set_nodes_tracked(0);

        info!(target: "mnm.manager", nodes = count, "Media node manager shut down");
    }

    async fn transition(
        &self,
        node_id: &str,
        transition: NodeTransition,
        at: DateTime<Utc>,
        operation: &'static str,
    ) -> Result<NextState, MnmError> {
        let result = match self.handle(node_id).await {
            Ok(handle) => handle.transition(transition, at).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            self.observe_failure(operation, node_id, e);
        }
        result
    }

    fn spawn_termination(&self, node_id: String) {
        let provisioner = Arc::clone(&self.inner.provisioner);
        tokio::spawn(async move {
            if let Err(e) = provisioner.request_termination(&node_id).await {
                metrics::record_error("request_termination", e.label());
                error!(
                    target: "mnm.manager",
                    node_id = %node_id,
                    error = %e,
                    "Termination request failed, node remains tracked until confirmed"
                );
            }
        });
    }

    fn observe_failure(&self, operation: &'static str, node_id: &str, error: &MnmError) {
        metrics::record_error(operation, error.label());
        if error.is_race() {
            debug!(
                target: "mnm.manager",
                node_id = %node_id,
                operation,
                error = %error,
                "Operation lost a race with node state"
            );
        } else {
            warn!(
                target: "mnm.manager",
                node_id = %node_id,
                operation,
                error = %error,
                "Operation rejected"
            );
        }
    }
}
