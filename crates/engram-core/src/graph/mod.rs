//! Property graph store
//!
//! Typed nodes and directed edges persisted in SQLite, with hash indexes on
//! `(type, id)`, `(type, from)`, and `(type, to)`. A small Cypher subset is
//! compiled onto store scans and bounded traversals in [`cypher`].

mod store;

pub mod cypher;

pub use cypher::{CypherQuery, GraphQueryResult};
pub use store::{GraphStats, GraphStore};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngramError;

/// Node type shared by every vector item (unified identity)
pub const NODE_DOCUMENT: &str = "Document";

/// Node type for markdown heading hierarchy
pub const NODE_SECTION: &str = "Section";

/// Node type for an ingested file that fans out into chunk documents
pub const NODE_SOURCE: &str = "Source";

/// Citation edge between documents
pub const EDGE_CITES: &str = "CITES";

/// Heading-tree edge
pub const EDGE_PARENT_OF: &str = "PARENT_OF";

/// Generic association edge
pub const EDGE_RELATES_TO: &str = "RELATES_TO";

/// Chunk-to-source provenance edge
pub const EDGE_DERIVED_FROM: &str = "DERIVED_FROM";

/// Wiki-style link edge
pub const EDGE_LINKS_TO: &str = "LINKS_TO";

/// String-keyed JSON property map
pub type Properties = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Graph store error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Edge endpoint or looked-up node missing
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// Traversal exhausted its node budget
    #[error("traversal budget exceeded: visited {visited} of {budget}")]
    BudgetExceeded {
        /// Nodes visited before giving up
        visited: usize,
        /// Configured ceiling
        budget: usize,
    },
    /// Query text failed to parse or is outside the supported subset
    #[error("malformed query: {0}")]
    Malformed(String),
    /// A connection lock was poisoned
    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl From<GraphError> for EngramError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::NodeNotFound(id) => EngramError::not_found("node", id),
            GraphError::BudgetExceeded { visited, budget } => {
                EngramError::TraversalBudgetExceeded { visited, budget }
            }
            GraphError::Malformed(msg) => EngramError::InvalidInput(msg),
            GraphError::Database(err) => EngramError::StorageFailure(err.to_string()),
            GraphError::Lock(msg) => EngramError::StorageFailure(msg),
        }
    }
}

// ============================================================================
// GRAPH TYPES
// ============================================================================

/// A typed node with JSON properties
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Globally unique id (shared with the vector item for Documents)
    pub id: String,
    /// Open-set node type
    pub node_type: String,
    /// Property map
    pub properties: Properties,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last property update
    pub updated_at: DateTime<Utc>,
}

/// A directed, typed edge
///
/// Parallel edges of the same type between the same endpoints are
/// idempotent: re-insertion updates properties in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Source node id
    pub from: String,
    /// Target node id
    pub to: String,
    /// Open-set edge type
    pub edge_type: String,
    /// Property map
    pub properties: Properties,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Follow edges from their source
    #[default]
    Outgoing,
    /// Follow edges into their target
    Incoming,
    /// Both directions
    Both,
}

/// A node reached by traversal, with its shortest-path depth
#[derive(Debug, Clone)]
pub struct Neighbour {
    /// The reached node
    pub node: GraphNode,
    /// Hops from the start node (1-based)
    pub depth: usize,
}

/// Aggregate graph statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCounts {
    /// Total nodes
    pub node_count: usize,
    /// Total edges
    pub edge_count: usize,
    /// Node count per type
    pub nodes_by_type: HashMap<String, usize>,
    /// Edge count per type
    pub edges_by_type: HashMap<String, usize>,
}
