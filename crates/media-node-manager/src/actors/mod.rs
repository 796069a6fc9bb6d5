//! Actor model for media nodes.
//!
//! ```text
//! MediaNodeManager (node table: node_id -> handle)
//! └── MediaNodeActor (one per tracked media node)
//!     ├── owns lifecycle state and timestamps
//!     └── owns the node's UsageLedger
//! ```
//!
//! - **Single writer per node**: every read and write of a node goes through
//!   its mailbox, so operations on one node are linearized while distinct
//!   nodes proceed in parallel
//! - **CancellationToken propagation**: node actors get child tokens of the
//!   manager's root token
//! - **Mailbox monitoring**: depth thresholds 50/200 with metrics
//!
//! # Modules
//!
//! - [`node`] - `MediaNodeActor` and its handle
//! - [`messages`] - Message and snapshot types
//! - [`metrics`] - Mailbox monitoring and fleet counters

pub mod messages;
pub mod metrics;
pub mod node;

pub use messages::{NodeMessage, NodeSnapshot, UsageUpdate};
pub use metrics::{FleetMetrics, FleetSnapshot, MailboxLevel, MailboxMonitor};
pub use node::{MediaNodeActor, MediaNodeActorHandle};
