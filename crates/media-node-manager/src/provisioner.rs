//! Infra provisioner collaborator.
//!
//! The manager asks infra to launch and terminate media nodes through the
//! `NodeProvisioner` trait. Infra reports outcomes back asynchronously through
//! the manager's `node_ready`, `cancel_launch` and `confirm_removal` entry
//! points, so no lifecycle operation ever waits on these calls.

use crate::errors::MnmError;
use crate::observability::metrics;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

/// Connect timeout for infra requests in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Requests the manager makes of the infra collaborator.
#[async_trait::async_trait]
pub trait NodeProvisioner: Send + Sync {
    /// Ask infra to create compute for `node_id`.
    async fn request_launch(&self, node_id: &str) -> Result<(), MnmError>;

    /// Ask infra to tear down (or release partial resources of) `node_id`.
    async fn request_termination(&self, node_id: &str) -> Result<(), MnmError>;
}

#[derive(Debug, Serialize)]
struct ProvisionRequest<'a> {
    node_id: &'a str,
}

/// HTTP implementation of `NodeProvisioner`.
///
/// - `POST {base_url}/v1/media-nodes/{node_id}/launch`
/// - `POST {base_url}/v1/media-nodes/{node_id}/terminate`
///
/// The node ID is a single percent-encoded path segment.
#[derive(Clone, Debug)]
pub struct HttpProvisioner {
    client: Client,
    base_url: Url,
}

impl HttpProvisioner {
    /// Create a provisioner client.
    ///
    /// # Errors
    ///
    /// Returns `MnmError::Config` if `base_url` is not an http(s) URL, or
    /// `MnmError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self, MnmError> {
        let base_url = Url::parse(base_url.as_ref())
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                MnmError::Config(format!(
                    "invalid infra provisioner URL: {}",
                    base_url.as_ref()
                ))
            })?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .build()
            .map_err(|e| {
                error!(target: "mnm.provisioner", error = %e, "Failed to build HTTP client");
                MnmError::Internal("failed to build provisioner HTTP client".to_string())
            })?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, node_id: &str, operation: &'static str) -> Result<Url, MnmError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| MnmError::Internal("provisioner URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v1", "media-nodes", node_id, operation]);
        Ok(url)
    }

    async fn post(&self, node_id: &str, operation: &'static str) -> Result<(), MnmError> {
        let url = self.endpoint(node_id, operation)?;
        let started = Instant::now();

        let response = self
            .client
            .post(url)
            .json(&ProvisionRequest { node_id })
            .send()
            .await
            .map_err(|e| {
                let status = if e.is_timeout() { "timeout" } else { "error" };
                metrics::record_provisioner_request(operation, status, started.elapsed());
                warn!(target: "mnm.provisioner", node_id = %node_id, operation, error = %e, "Infra request failed");
                MnmError::Provisioner(format!("{operation} request for {node_id} failed: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            metrics::record_provisioner_request(operation, "success", started.elapsed());
            debug!(target: "mnm.provisioner", node_id = %node_id, operation, "Infra accepted request");
            Ok(())
        } else {
            metrics::record_provisioner_request(operation, "error", started.elapsed());
            let body = response.text().await.unwrap_or_default();
            warn!(
                target: "mnm.provisioner",
                node_id = %node_id,
                operation,
                status = %status,
                body = %body,
                "Infra rejected request"
            );
            Err(MnmError::Provisioner(format!(
                "{operation} request for {node_id} returned {status}"
            )))
        }
    }
}

#[async_trait::async_trait]
impl NodeProvisioner for HttpProvisioner {
    #[instrument(skip_all, name = "mnm.provisioner.launch", fields(node_id = %node_id))]
    async fn request_launch(&self, node_id: &str) -> Result<(), MnmError> {
        self.post(node_id, "launch").await
    }

    #[instrument(skip_all, name = "mnm.provisioner.terminate", fields(node_id = %node_id))]
    async fn request_termination(&self, node_id: &str) -> Result<(), MnmError> {
        self.post(node_id, "terminate").await
    }
}

/// Mock provisioner module for testing.
pub mod mock {

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A request received by `MockProvisioner`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ProvisionerCall {
        Launch(String),
        Terminate(String),
    }

    /// Mock provisioner recording every request.
    #[derive(Debug, Default)]
    pub struct MockProvisioner {
        calls: Mutex<Vec<ProvisionerCall>>,
        call_count: AtomicUsize,
        fail_launches: bool,
        fail_terminations: bool,
    }

    impl MockProvisioner {
        /// Create a mock that accepts every request.
        #[must_use]
        pub fn accepting() -> Self {
            Self::default()
        }

        /// Create a mock that fails every request.
        #[must_use]
        pub fn failing() -> Self {
            Self {
                fail_launches: true,
                fail_terminations: true,
                ..Self::default()
            }
        }

        /// Create a mock that fails launch requests only.
        #[must_use]
        pub fn failing_launches() -> Self {
            Self {
                fail_launches: true,
                ..Self::default()
            }
        }

        #[must_use]
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn calls(&self) -> Vec<ProvisionerCall> {
            self.calls
                .lock()
                .map(|calls| calls.clone())
                .unwrap_or_default()
        }

        /// Node IDs for which termination was requested, in order.
        #[must_use]
        pub fn terminations(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    ProvisionerCall::Terminate(id) => Some(id),
                    ProvisionerCall::Launch(_) => None,
                })
                .collect()
        }

        /// Node IDs for which a launch was requested, in order.
        #[must_use]
        pub fn launches(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    ProvisionerCall::Launch(id) => Some(id),
                    ProvisionerCall::Terminate(_) => None,
                })
                .collect()
        }

        /// Yield until at least `count` requests arrived.
        ///
        /// Requests are issued from spawned tasks; returns whether the count
        /// was reached.
        pub async fn wait_for_calls(&self, count: usize) -> bool {
            for _ in 0..1_000 {
                if self.call_count() >= count {
                    return true;
                }
                tokio::task::yield_now().await;
            }
            self.call_count() >= count
        }

        fn record(&self, call: ProvisionerCall) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
            self.call_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl NodeProvisioner for MockProvisioner {
        async fn request_launch(&self, node_id: &str) -> Result<(), MnmError> {
            self.record(ProvisionerCall::Launch(node_id.to_string()));
            if self.fail_launches {
                return Err(MnmError::Provisioner("mock launch failure".to_string()));
            }
            Ok(())
        }

        async fn request_termination(&self, node_id: &str) -> Result<(), MnmError> {
            self.record(ProvisionerCall::Terminate(node_id.to_string()));
            if self.fail_terminations {
                return Err(MnmError::Provisioner(
                    "mock termination failure".to_string(),
                ));
            }
            Ok(())
        }
    }

}
