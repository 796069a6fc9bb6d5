//! HTTP request handlers for the media node manager.

pub mod metrics;
pub mod nodes;

pub use metrics::metrics_handler;
pub use nodes::{
    cancel_launch, confirm_removal, deregister_usage, drop_idle_node, launch_node, node_ready,
    register_usage,
};
