//! Per-node usage ledger.
//!
//! A node's active connection count is the cardinality of its usage set, and
//! that set is the only source of truth for idleness. The ledger does pure
//! in-memory accounting; lifecycle checks are made by the owning node actor
//! before it touches the ledger.

use crate::errors::MnmError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One active client connection occupying a media node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUsage {
    /// Connection identifier (unique within the node).
    pub connection_id: String,
    /// Node the connection occupies.
    pub node_id: String,
    /// When the signaling layer reported the connection.
    pub connected_at: DateTime<Utc>,
}

/// Active usages of a single media node, keyed by connection ID.
#[derive(Debug)]
pub struct UsageLedger {
    node_id: String,
    usages: HashMap<String, ConnectionUsage>,
}

impl UsageLedger {
    /// Create an empty ledger for `node_id`.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            usages: HashMap::new(),
        }
    }

    /// Record a new usage.
    ///
    /// Returns the resulting usage count.
    ///
    /// # Errors
    ///
    /// `MnmError::DuplicateUsage` if `connection_id` is already registered.
    pub fn register(
        &mut self,
        connection_id: &str,
        connected_at: DateTime<Utc>,
    ) -> Result<usize, MnmError> {
        if self.usages.contains_key(connection_id) {
            return Err(MnmError::DuplicateUsage {
                node_id: self.node_id.clone(),
                connection_id: connection_id.to_string(),
            });
        }

        self.usages.insert(
            connection_id.to_string(),
            ConnectionUsage {
                connection_id: connection_id.to_string(),
                node_id: self.node_id.clone(),
                connected_at,
            },
        );

        Ok(self.usages.len())
    }

    /// Remove a usage.
    ///
    /// Returns the removed usage.
    ///
    /// # Errors
    ///
    /// `MnmError::UnknownUsage` if `connection_id` is not registered.
    pub fn deregister(&mut self, connection_id: &str) -> Result<ConnectionUsage, MnmError> {
        self.usages
            .remove(connection_id)
            .ok_or_else(|| MnmError::UnknownUsage {
                node_id: self.node_id.clone(),
                connection_id: connection_id.to_string(),
            })
    }

    /// Current number of active usages.
    #[must_use]
    pub fn count(&self) -> usize {
        self.usages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }

    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.usages.contains_key(connection_id)
    }
}
