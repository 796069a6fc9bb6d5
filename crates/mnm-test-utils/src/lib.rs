//! # MNM Test Utilities
//!
//! Shared test utilities for the media node manager (MNM).
//!
//! ## Modules
//!
//! - `fixtures` - Timestamps, idle policies, a manager harness and
//!   `TestNode` for placing a node in any lifecycle state
//! - `MockProvisioner` - Recording infra provisioner (re-exported)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mnm_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestHarness::new(policy(60, Some(300)));
//!
//!     TestNode::new("kms-1")
//!         .with_usages(&["conn-1"])
//!         .create(&harness.manager)
//!         .await;
//!
//!     assert!(harness.manager.is_running("kms-1").await);
//! }
//! ```

pub mod fixtures;

pub use fixtures::*;
pub use media_node_manager::provisioner::mock::{MockProvisioner, ProvisionerCall};
