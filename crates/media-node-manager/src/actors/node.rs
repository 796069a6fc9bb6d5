//! `MediaNodeActor` - per-node actor that owns a media node's lifecycle state
//! and usage ledger.
//!
//! Each `MediaNodeActor`:
//! - Owns the node's state, timestamps and `UsageLedger` exclusively
//! - Processes one message at a time, so registration, deregistration, idle
//!   evaluation and transitions on the same node never interleave
//! - Stops after applying the terminal `confirmed` transition
//!
//! Invariant checked after every mutation: a node that is not `Running` has an
//! empty ledger.

use crate::errors::MnmError;
use crate::lifecycle::{NextState, NodeState, NodeTransition};
use crate::ledger::UsageLedger;
use crate::observability::metrics;
use crate::reaper::{IdleAction, IdlePolicy};

use super::messages::{NodeMessage, NodeSnapshot, UsageUpdate};
use super::metrics::{FleetMetrics, MailboxMonitor};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the node mailbox.
const NODE_CHANNEL_BUFFER: usize = 256;

/// Handle to a `MediaNodeActor`.
///
/// A closed mailbox means the actor has stopped (node removed or manager shut
/// down), so every handle method reports `UnknownNode` in that case.
#[derive(Clone, Debug)]
pub struct MediaNodeActorHandle {
    node_id: String,
    sender: mpsc::Sender<NodeMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl MediaNodeActorHandle {
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether both handles point at the same actor instance.
    #[must_use]
    pub fn same_actor(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Whether the actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Stop the actor without a lifecycle transition.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NodeMessage,
    ) -> Result<T, MnmError> {
        let (tx, rx) = oneshot::channel();

        self.mailbox.record_enqueue();
        if self.sender.send(build(tx)).await.is_err() {
            self.mailbox.record_rejected();
            return Err(MnmError::UnknownNode(self.node_id.clone()));
        }

        // Dropped reply: the actor stopped before handling the message
        rx.await
            .map_err(|_| MnmError::UnknownNode(self.node_id.clone()))
    }

    /// Register a connection on the node.
    pub async fn register_usage(
        &self,
        connection_id: String,
        connected_at: DateTime<Utc>,
    ) -> Result<UsageUpdate, MnmError> {
        self.request(|respond_to| NodeMessage::RegisterUsage {
            connection_id,
            connected_at,
            respond_to,
        })
        .await?
    }

    /// Deregister a connection. Returns the remaining usage count.
    pub async fn deregister_usage(
        &self,
        connection_id: String,
        disconnected_at: DateTime<Utc>,
    ) -> Result<usize, MnmError> {
        self.request(|respond_to| NodeMessage::DeregisterUsage {
            connection_id,
            disconnected_at,
            respond_to,
        })
        .await?
    }

    /// Apply a lifecycle transition.
    pub async fn transition(
        &self,
        transition: NodeTransition,
        at: DateTime<Utc>,
    ) -> Result<NextState, MnmError> {
        self.request(|respond_to| NodeMessage::Transition {
            transition,
            at,
            respond_to,
        })
        .await?
    }

    /// Evaluate the idle policy against the node's current state and apply
    /// the resulting action.
    pub async fn evaluate_idle(
        &self,
        policy: IdlePolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<IdleAction>, MnmError> {
        self.request(|respond_to| NodeMessage::EvaluateIdle {
            policy,
            now,
            respond_to,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<NodeSnapshot, MnmError> {
        self.request(|respond_to| NodeMessage::GetSnapshot { respond_to })
            .await
    }
}

/// State owned by a node actor.
#[derive(Debug)]
struct MediaNode {
    state: NodeState,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    state_entered_at: DateTime<Utc>,
    ledger: UsageLedger,
}

impl MediaNode {
    fn invariants_hold(&self) -> bool {
        self.state == NodeState::Running || self.ledger.is_empty()
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
    }
}

/// Per-node actor.
pub struct MediaNodeActor {
    node_id: String,
    receiver: mpsc::Receiver<NodeMessage>,
    cancel_token: CancellationToken,
    node: MediaNode,
    fleet: Arc<FleetMetrics>,
    mailbox: Arc<MailboxMonitor>,
    removed: bool,
}

impl MediaNodeActor {
    /// Spawn a node actor in `Launching`.
    ///
    /// Returns the handle and the task's join handle.
    pub fn spawn(
        node_id: String,
        requested_at: DateTime<Utc>,
        cancel_token: CancellationToken,
        fleet: Arc<FleetMetrics>,
    ) -> (MediaNodeActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(NODE_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(node_id.clone()));

        fleet.node_added(NodeState::Launching);

        let actor = Self {
            node_id: node_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            node: MediaNode {
                state: NodeState::Launching,
                created_at: requested_at,
                last_activity_at: requested_at,
                state_entered_at: requested_at,
                ledger: UsageLedger::new(node_id.clone()),
            },
            fleet,
            mailbox: Arc::clone(&mailbox),
            removed: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MediaNodeActorHandle {
            node_id,
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "mnm.actor.node", fields(node_id = %self.node_id))]
    async fn run(mut self) {
        debug!(target: "mnm.actor.node", node_id = %self.node_id, "MediaNodeActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "mnm.actor.node",
                        node_id = %self.node_id,
                        "MediaNodeActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            if self.removed {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // Messages still queued are dropped with their reply channels
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {
            self.mailbox.record_rejected();
        }

        if !self.removed {
            // Stopped without confirmation (shutdown); release fleet counters
            self.fleet.node_removed(self.node.state);
            for _ in 0..self.node.ledger.count() {
                self.fleet.usage_removed();
            }
        }

        debug!(
            target: "mnm.actor.node",
            node_id = %self.node_id,
            state = %self.node.state,
            removed = self.removed,
            messages_processed = self.mailbox.messages_processed(),
            "MediaNodeActor stopped"
        );
    }

    fn handle_message(&mut self, message: NodeMessage) {
        match message {
            NodeMessage::RegisterUsage {
                connection_id,
                connected_at,
                respond_to,
            } => {
                let result = self.register_usage(&connection_id, connected_at);
                let _ = respond_to.send(result);
            }

            NodeMessage::DeregisterUsage {
                connection_id,
                disconnected_at,
                respond_to,
            } => {
                let result = self.deregister_usage(&connection_id, disconnected_at);
                let _ = respond_to.send(result);
            }

            NodeMessage::Transition {
                transition,
                at,
                respond_to,
            } => {
                let result = self.requested_transition(transition, at);
                let _ = respond_to.send(result);
            }

            NodeMessage::EvaluateIdle {
                policy,
                now,
                respond_to,
            } => {
                let action = self.evaluate_idle(&policy, now);
                let _ = respond_to.send(action);
            }

            NodeMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.node_id.clone(),
            state: self.node.state,
            usage_count: self.node.ledger.count(),
            created_at: self.node.created_at,
            last_activity_at: self.node.last_activity_at,
            state_entered_at: self.node.state_entered_at,
        }
    }

    fn register_usage(
        &mut self,
        connection_id: &str,
        connected_at: DateTime<Utc>,
    ) -> Result<UsageUpdate, MnmError> {
        if !self.node.state.accepts_usages() {
            return Err(MnmError::InvalidState {
                node_id: self.node_id.clone(),
                state: self.node.state,
            });
        }

        if self.node.ledger.contains(connection_id) {
            return Err(MnmError::DuplicateUsage {
                node_id: self.node_id.clone(),
                connection_id: connection_id.to_string(),
            });
        }

        // Reactivate first: the guard sees the count the node will have
        let reactivated = if self.node.state == NodeState::WaitingIdleToTerminate {
            let pending_count = self.node.ledger.count() + 1;
            self.apply(NodeTransition::Reactivate, pending_count, connected_at)?;
            true
        } else {
            false
        };

        let usage_count = self.node.ledger.register(connection_id, connected_at)?;
        self.node.touch(connected_at);
        self.fleet.usage_added();

        debug_assert!(self.node.invariants_hold());

        debug!(
            target: "mnm.actor.node",
            node_id = %self.node_id,
            connection_id = %connection_id,
            usage_count,
            reactivated,
            "Usage registered"
        );

        Ok(UsageUpdate {
            usage_count,
            reactivated,
        })
    }

    fn deregister_usage(
        &mut self,
        connection_id: &str,
        disconnected_at: DateTime<Utc>,
    ) -> Result<usize, MnmError> {
        self.node.ledger.deregister(connection_id)?;
        self.node.touch(disconnected_at);
        self.fleet.usage_removed();

        let remaining = self.node.ledger.count();
        debug!(
            target: "mnm.actor.node",
            node_id = %self.node_id,
            connection_id = %connection_id,
            usage_count = remaining,
            "Usage deregistered"
        );

        Ok(remaining)
    }

    fn requested_transition(
        &mut self,
        transition: NodeTransition,
        at: DateTime<Utc>,
    ) -> Result<NextState, MnmError> {
        let usage_count = self.node.ledger.count();

        if transition == NodeTransition::DropRequested
            && self.node.state == NodeState::Running
            && usage_count > 0
        {
            return Err(MnmError::NotIdle {
                node_id: self.node_id.clone(),
                usage_count,
            });
        }

        self.apply(transition, usage_count, at)
    }

    fn evaluate_idle(&mut self, policy: &IdlePolicy, now: DateTime<Utc>) -> Option<IdleAction> {
        let action = policy.evaluate(&self.snapshot(), now)?;

        let transition = match action {
            IdleAction::MarkIdle => NodeTransition::IdleTimeout,
            IdleAction::Escalate => NodeTransition::DropRequested,
        };

        match self.apply(transition, self.node.ledger.count(), now) {
            Ok(_) => Some(action),
            Err(e) => {
                // Policy only proposes legal edges; anything else is a bug
                warn!(
                    target: "mnm.actor.node",
                    node_id = %self.node_id,
                    error = %e,
                    "Idle action rejected"
                );
                None
            }
        }
    }

    /// Apply `transition` if the lifecycle graph allows it with `usage_count`.
    fn apply(
        &mut self,
        transition: NodeTransition,
        usage_count: usize,
        at: DateTime<Utc>,
    ) -> Result<NextState, MnmError> {
        let from = self.node.state;
        let next = from
            .next(transition, usage_count)
            .ok_or_else(|| MnmError::IllegalTransition {
                node_id: self.node_id.clone(),
                from,
                transition,
            })?;

        match next {
            NextState::State(to) => {
                self.node.state = to;
                self.node.state_entered_at = at;
                if transition == NodeTransition::Ready {
                    self.node.last_activity_at = at;
                }
                self.fleet.node_moved(from, to);
            }
            NextState::Removed => {
                self.removed = true;
                self.fleet.node_removed(from);
            }
        }

        metrics::record_transition(transition);
        debug_assert!(self.node.invariants_hold());

        info!(
            target: "mnm.actor.node",
            node_id = %self.node_id,
            from = %from,
            transition = %transition,
            "Media node transition applied"
        );

        Ok(next)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn spawn_node(node_id: &str) -> (MediaNodeActorHandle, Arc<FleetMetrics>) {
        let fleet = FleetMetrics::new();
        let (handle, _task) = MediaNodeActor::spawn(
            node_id.to_string(),
            at(0),
            CancellationToken::new(),
            Arc::clone(&fleet),
        );
        (handle, fleet)
    }

    async fn running_node(node_id: &str) -> (MediaNodeActorHandle, Arc<FleetMetrics>) {
        let (handle, fleet) = spawn_node(node_id);
        handle.transition(NodeTransition::Ready, at(1)).await.unwrap();
        (handle, fleet)
    }

    #[tokio::test]
    async fn test_spawned_node_is_launching() {
        let (handle, fleet) = spawn_node("kms-1");

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.node_id, "kms-1");
        assert_eq!(snapshot.state, NodeState::Launching);
        assert_eq!(snapshot.usage_count, 0);
        assert_eq!(snapshot.created_at, at(0));
        assert_eq!(fleet.nodes_in(NodeState::Launching), 1);
    }

    #[tokio::test]
    async fn test_ready_sets_last_activity() {
        let (handle, fleet) = running_node("kms-1").await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, NodeState::Running);
        assert_eq!(snapshot.last_activity_at, at(1));
        assert_eq!(snapshot.state_entered_at, at(1));
        assert_eq!(fleet.nodes_in(NodeState::Running), 1);
        assert_eq!(fleet.nodes_in(NodeState::Launching), 0);
    }

    #[tokio::test]
    async fn test_register_on_launching_node_is_rejected() {
        let (handle, _) = spawn_node("kms-1");

        let result = handle.register_usage("conn-1".to_string(), at(1)).await;
        assert!(matches!(
            result,
            Err(MnmError::InvalidState {
                state: NodeState::Launching,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_register_and_deregister_track_activity() {
        let (handle, fleet) = running_node("kms-1").await;

        let update = handle.register_usage("conn-1".to_string(), at(10)).await.unwrap();
        assert_eq!(
            update,
            UsageUpdate {
                usage_count: 1,
                reactivated: false
            }
        );
        assert_eq!(fleet.active_usages(), 1);

        let remaining = handle.deregister_usage("conn-1".to_string(), at(20)).await.unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(fleet.active_usages(), 0);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.last_activity_at, at(20));
        // Deregistration never transitions on its own
        assert_eq!(snapshot.state, NodeState::Running);
    }

    #[tokio::test]
    async fn test_out_of_order_timestamps_keep_latest_activity() {
        let (handle, _) = running_node("kms-1").await;

        handle.register_usage("conn-1".to_string(), at(50)).await.unwrap();
        handle.register_usage("conn-2".to_string(), at(30)).await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.last_activity_at, at(50));
    }

    #[tokio::test]
    async fn test_registration_reactivates_waiting_node() {
        let (handle, _) = running_node("kms-1").await;
        handle.transition(NodeTransition::IdleTimeout, at(100)).await.unwrap();

        let update = handle.register_usage("conn-1".to_string(), at(110)).await.unwrap();
        assert!(update.reactivated);
        assert_eq!(update.usage_count, 1);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, NodeState::Running);
        assert_eq!(snapshot.state_entered_at, at(110));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let (handle, _) = running_node("kms-1").await;
        handle.register_usage("conn-1".to_string(), at(5)).await.unwrap();

        let result = handle.register_usage("conn-1".to_string(), at(6)).await;
        assert!(matches!(result, Err(MnmError::DuplicateUsage { .. })));
        assert_eq!(handle.snapshot().await.unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn test_drop_with_usages_is_not_idle() {
        let (handle, _) = running_node("kms-1").await;
        handle.register_usage("conn-1".to_string(), at(5)).await.unwrap();

        let result = handle.transition(NodeTransition::DropRequested, at(6)).await;
        assert!(matches!(
            result,
            Err(MnmError::NotIdle { usage_count: 1, .. })
        ));
        assert_eq!(handle.snapshot().await.unwrap().state, NodeState::Running);
    }

    #[tokio::test]
    async fn test_idle_timeout_with_usages_is_illegal() {
        let (handle, _) = running_node("kms-1").await;
        handle.register_usage("conn-1".to_string(), at(5)).await.unwrap();

        let result = handle.transition(NodeTransition::IdleTimeout, at(6)).await;
        assert!(matches!(result, Err(MnmError::IllegalTransition { .. })));
    }

    #[tokio::test]
    async fn test_confirmed_stops_actor() {
        let (handle, fleet) = spawn_node("kms-1");
        handle.transition(NodeTransition::Cancel, at(1)).await.unwrap();

        let next = handle.transition(NodeTransition::Confirmed, at(2)).await.unwrap();
        assert_eq!(next, NextState::Removed);
        assert_eq!(fleet.snapshot().tracked(), 0);

        // Actor is gone; later calls see an unknown node
        let result = handle.snapshot().await;
        assert!(matches!(result, Err(MnmError::UnknownNode(ref id)) if id == "kms-1"));
    }

    #[tokio::test]
    async fn test_evaluate_idle_marks_and_escalates() {
        let (handle, _) = running_node("kms-1").await;
        let policy = IdlePolicy::new(Duration::seconds(60), Some(Duration::seconds(120)));

        assert_eq!(handle.evaluate_idle(policy, at(30)).await.unwrap(), None);
        assert_eq!(
            handle.evaluate_idle(policy, at(61)).await.unwrap(),
            Some(IdleAction::MarkIdle)
        );
        assert_eq!(handle.evaluate_idle(policy, at(100)).await.unwrap(), None);
        assert_eq!(
            handle.evaluate_idle(policy, at(181)).await.unwrap(),
            Some(IdleAction::Escalate)
        );
        assert_eq!(
            handle.snapshot().await.unwrap().state,
            NodeState::Terminating
        );
    }

    #[tokio::test]
    async fn test_cancel_releases_fleet_counters() {
        let fleet = FleetMetrics::new();
        let (handle, task) = MediaNodeActor::spawn(
            "kms-1".to_string(),
            at(0),
            CancellationToken::new(),
            Arc::clone(&fleet),
        );
        handle.transition(NodeTransition::Ready, at(1)).await.unwrap();
        handle.register_usage("conn-1".to_string(), at(5)).await.unwrap();

        handle.cancel();
        assert!(handle.is_cancelled());
        task.await.unwrap();

        assert!(handle.is_closed());
        assert_eq!(fleet.snapshot().tracked(), 0);
        assert_eq!(fleet.active_usages(), 0);
    }

    #[tokio::test]
    async fn test_same_actor() {
        let (first, _) = spawn_node("kms-1");
        let (second, _) = spawn_node("kms-1");

        assert!(first.same_actor(&first.clone()));
        assert!(!first.same_actor(&second));
    }
}
