//! Test fixtures for media node manager tests.

use chrono::{DateTime, TimeZone, Utc};
use media_node_manager::lifecycle::NodeState;
use media_node_manager::manager::MediaNodeManager;
use media_node_manager::provisioner::mock::MockProvisioner;
use media_node_manager::reaper::IdlePolicy;
use std::sync::Arc;
use uuid::Uuid;

/// Fixed epoch all fixture timestamps are offset from.
pub const EPOCH_SECS: i64 = 1_700_000_000;

/// Timestamp `secs` seconds after the fixture epoch.
#[must_use]
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(EPOCH_SECS + secs, 0).unwrap()
}

/// Idle policy from whole seconds. `None` disables escalation.
#[must_use]
pub fn policy(idle_grace_secs: i64, escalation_grace_secs: Option<i64>) -> IdlePolicy {
    IdlePolicy::new(
        chrono::Duration::seconds(idle_grace_secs),
        escalation_grace_secs.map(chrono::Duration::seconds),
    )
}

/// A manager wired to a recording provisioner.
pub struct TestHarness {
    pub manager: MediaNodeManager,
    pub provisioner: Arc<MockProvisioner>,
}

impl TestHarness {
    /// Harness whose provisioner accepts every request.
    #[must_use]
    pub fn new(policy: IdlePolicy) -> Self {
        Self::with_provisioner(MockProvisioner::accepting(), policy)
    }

    #[must_use]
    pub fn with_provisioner(provisioner: MockProvisioner, policy: IdlePolicy) -> Self {
        let provisioner = Arc::new(provisioner);
        let manager = MediaNodeManager::new(provisioner.clone(), policy);
        Self {
            manager,
            provisioner,
        }
    }
}

/// Builder placing a node in a given lifecycle state.
#[derive(Debug, Clone)]
pub struct TestNode {
    pub id: String,
    pub state: NodeState,
    pub usages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TestNode {
    /// A running node with no usages, created at `at(0)`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: NodeState::Running,
            usages: Vec::new(),
            created_at: at(0),
        }
    }

    /// A running node with a random ID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("kms-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn in_state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }

    /// Connections registered on the node. Only meaningful for `Running`.
    #[must_use]
    pub fn with_usages(mut self, connection_ids: &[&str]) -> Self {
        self.usages = connection_ids.iter().map(|id| (*id).to_string()).collect();
        self
    }

    /// Time the node was requested, readied and used.
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Create the node in `manager` and drive it to the configured state.
    ///
    /// `WaitingIdleToTerminate` is reached through an idle scan at
    /// `created_at + idle grace`, which applies to the whole fleet.
    /// `Terminating` and `Canceled` issue a termination request to the
    /// provisioner.
    pub async fn create(&self, manager: &MediaNodeManager) -> &Self {
        manager.request_node(&self.id, self.created_at).await.unwrap();

        match self.state {
            NodeState::Launching => {}
            NodeState::Canceled => {
                manager.cancel_launch(&self.id, self.created_at).await.unwrap();
            }
            NodeState::Running => {
                manager.node_ready(&self.id, self.created_at).await.unwrap();
                for connection_id in &self.usages {
                    manager
                        .media_node_usage_registration(&self.id, connection_id, self.created_at)
                        .await
                        .unwrap();
                }
            }
            NodeState::WaitingIdleToTerminate => {
                manager.node_ready(&self.id, self.created_at).await.unwrap();
                let grace = manager.idle_policy().idle_grace_period;
                manager.scan_idle(self.created_at + grace).await;
                assert!(
                    manager.is_waiting_idle_to_terminate(&self.id).await,
                    "node {} did not become idle",
                    self.id
                );
            }
            NodeState::Terminating => {
                manager.node_ready(&self.id, self.created_at).await.unwrap();
                manager.drop_idle_media_node(&self.id).await.unwrap();
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_offsets_from_epoch() {
        assert_eq!(at(90) - at(0), chrono::Duration::seconds(90));
        assert_eq!(at(0).timestamp(), EPOCH_SECS);
    }

    #[test]
    fn test_policy_from_seconds() {
        let policy = policy(60, None);
        assert_eq!(policy.idle_grace_period, chrono::Duration::seconds(60));
        assert!(policy.escalation_grace_period.is_none());
    }

    #[tokio::test]
    async fn test_node_reaches_each_state() {
        let harness = TestHarness::new(policy(60, Some(300)));

        for (id, state) in [
            ("kms-l", NodeState::Launching),
            ("kms-r", NodeState::Running),
            ("kms-w", NodeState::WaitingIdleToTerminate),
            ("kms-t", NodeState::Terminating),
            ("kms-c", NodeState::Canceled),
        ] {
            TestNode::new(id).in_state(state).create(&harness.manager).await;
            assert_eq!(harness.manager.node_state(id).await, Some(state), "{id}");
        }
    }

    #[tokio::test]
    async fn test_usages_are_registered() {
        let harness = TestHarness::new(policy(60, None));

        TestNode::random()
            .with_usages(&["conn-1", "conn-2"])
            .create(&harness.manager)
            .await;

        let nodes = harness.manager.list_nodes().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes.first().map(|node| node.usage_count), Some(2));
    }
}
