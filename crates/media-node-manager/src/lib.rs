//! Media Node Manager (MNM) Service Library
//!
//! Tracks the lifecycle of media-server compute nodes on behalf of the
//! signaling layer:
//!
//! - Per-node usage ledger of the client connections holding a node busy
//! - Five-state lifecycle (`Launching`, `Running`, `WaitingIdleToTerminate`,
//!   `Terminating`, `Canceled`)
//! - Two-stage idle reaper that retires nodes nobody is using
//! - Non-blocking launch and termination requests to the infra provisioner
//!
//! # Architecture
//!
//! Every tracked node is owned by its own actor task, so all operations on a
//! node are linearized through one mailbox while operations on different
//! nodes run in parallel:
//!
//! ```text
//! MediaNodeManager (registry of node handles)
//! ├── MediaNodeActor (one per tracked node)
//! │   ├── owns NodeState and timestamps
//! │   └── owns the node's UsageLedger
//! ├── IdleReaper (background task, periodic + on-demand scans)
//! └── NodeProvisioner (infra collaborator, fire-and-forget)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Per-node actor, messages and fleet metrics
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with appropriate HTTP status codes
//! - [`ledger`] - Usage ledger
//! - [`lifecycle`] - Node state machine
//! - [`manager`] - `MediaNodeManager` facade
//! - [`reaper`] - Idle policy and reaper task
//! - [`provisioner`] - Infra provisioner seam and HTTP client
//! - [`routes`] / [`handlers`] - Internal HTTP API

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod observability;
pub mod provisioner;
pub mod reaper;
pub mod routes;
