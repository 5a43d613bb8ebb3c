//! SQLite-backed property graph
//!
//! Separate reader/writer connections give interior mutability: all methods
//! take `&self`, so the store is `Send + Sync` behind an `Arc` without an
//! outer mutex around the whole graph.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::{Direction, GraphCounts, GraphEdge, GraphError, GraphNode, Neighbour, Properties};

// ============================================================================
// MIGRATIONS
// ============================================================================

/// A schema migration
#[derive(Debug, Clone)]
struct Migration {
    version: u32,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up: r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    node_type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_graph_nodes_type ON graph_nodes(node_type, id);

CREATE TABLE IF NOT EXISTS graph_edges (
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id, edge_type)
);

CREATE INDEX IF NOT EXISTS idx_graph_edges_from ON graph_edges(edge_type, from_id);
CREATE INDEX IF NOT EXISTS idx_graph_edges_to ON graph_edges(edge_type, to_id);
"#,
}];

fn apply_migrations(conn: &Connection) -> Result<(), GraphError> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    for migration in MIGRATIONS {
        if migration.version > current {
            conn.execute_batch(migration.up)?;
            conn.pragma_update(None, "user_version", migration.version)?;
        }
    }
    Ok(())
}

// ============================================================================
// GRAPH STORE
// ============================================================================

/// Persistent property graph for one collection
pub struct GraphStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

/// Aggregate statistics alias kept for the facade
pub type GraphStats = GraphCounts;

impl GraphStore {
    /// Open (or create) the graph database at `path`
    pub fn open(path: &Path) -> Result<Self, GraphError> {
        let writer = Connection::open(path)?;
        Self::configure(&writer)?;
        apply_migrations(&writer)?;

        let reader = Connection::open(path)?;
        Self::configure(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn configure(conn: &Connection) -> Result<(), GraphError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16000;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn write(&self) -> Result<std::sync::MutexGuard<'_, Connection>, GraphError> {
        self.writer
            .lock()
            .map_err(|_| GraphError::Lock("graph writer".into()))
    }

    fn read(&self) -> Result<std::sync::MutexGuard<'_, Connection>, GraphError> {
        self.reader
            .lock()
            .map_err(|_| GraphError::Lock("graph reader".into()))
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Create or update a node; properties are replaced wholesale
    pub fn upsert_node(
        &self,
        id: &str,
        node_type: &str,
        properties: &Properties,
    ) -> Result<(), GraphError> {
        let now = Utc::now().to_rfc3339();
        let props = serde_json::Value::Object(properties.clone()).to_string();
        self.write()?.execute(
            "INSERT INTO graph_nodes (id, node_type, properties, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 node_type = excluded.node_type,
                 properties = excluded.properties,
                 updated_at = excluded.updated_at",
            params![id, node_type, props, now],
        )?;
        Ok(())
    }

    /// Fetch a node by id
    pub fn get_node(&self, id: &str) -> Result<Option<GraphNode>, GraphError> {
        let conn = self.read()?;
        let node = conn
            .query_row(
                "SELECT id, node_type, properties, created_at, updated_at
                 FROM graph_nodes WHERE id = ?1",
                params![id],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    /// True when a node with this id exists
    pub fn contains_node(&self, id: &str) -> Result<bool, GraphError> {
        let conn = self.read()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM graph_nodes WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Scan nodes by optional type, with a row cap
    pub fn find_nodes(
        &self,
        node_type: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<GraphNode>, GraphError> {
        let conn = self.read()?;
        let cap = limit.unwrap_or(usize::MAX) as i64;
        let mut nodes = Vec::new();

        match node_type {
            Some(t) => {
                let mut stmt = conn.prepare(
                    "SELECT id, node_type, properties, created_at, updated_at
                     FROM graph_nodes WHERE node_type = ?1 ORDER BY id LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![t, cap], row_to_node)?;
                for row in rows {
                    nodes.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, node_type, properties, created_at, updated_at
                     FROM graph_nodes ORDER BY id LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![cap], row_to_node)?;
                for row in rows {
                    nodes.push(row?);
                }
            }
        }
        Ok(nodes)
    }

    /// Delete a node and every incident edge; false when absent
    pub fn delete_node(&self, id: &str) -> Result<bool, GraphError> {
        let conn = self.write()?;
        conn.execute(
            "DELETE FROM graph_edges WHERE from_id = ?1 OR to_id = ?1",
            params![id],
        )?;
        let removed = conn.execute("DELETE FROM graph_nodes WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Create a directed edge; both endpoints must exist at commit
    ///
    /// Re-inserting the same `(from, to, type)` updates properties in place.
    pub fn upsert_edge(
        &self,
        from: &str,
        to: &str,
        edge_type: &str,
        properties: &Properties,
    ) -> Result<(), GraphError> {
        if !self.contains_node(from)? {
            return Err(GraphError::NodeNotFound(from.to_string()));
        }
        if !self.contains_node(to)? {
            return Err(GraphError::NodeNotFound(to.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let props = serde_json::Value::Object(properties.clone()).to_string();
        self.write()?.execute(
            "INSERT INTO graph_edges (from_id, to_id, edge_type, properties, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(from_id, to_id, edge_type) DO UPDATE SET
                 properties = excluded.properties",
            params![from, to, edge_type, props, now],
        )?;
        Ok(())
    }

    /// Delete an edge; false when absent
    pub fn delete_edge(&self, from: &str, to: &str, edge_type: &str) -> Result<bool, GraphError> {
        let removed = self.write()?.execute(
            "DELETE FROM graph_edges WHERE from_id = ?1 AND to_id = ?2 AND edge_type = ?3",
            params![from, to, edge_type],
        )?;
        Ok(removed > 0)
    }

    /// Edges incident to a node, filtered by direction and optional types
    pub fn edges_of(
        &self,
        id: &str,
        direction: Direction,
        types: Option<&[String]>,
    ) -> Result<Vec<GraphEdge>, GraphError> {
        let conn = self.read()?;
        let mut stmt = conn.prepare(
            "SELECT from_id, to_id, edge_type, properties, created_at
             FROM graph_edges WHERE from_id = ?1 OR to_id = ?1",
        )?;
        let rows = stmt.query_map(params![id], row_to_edge)?;

        let mut edges = Vec::new();
        for row in rows {
            let edge = row?;
            let directional = match direction {
                Direction::Outgoing => edge.from == id,
                Direction::Incoming => edge.to == id,
                Direction::Both => true,
            };
            if !directional {
                continue;
            }
            if let Some(types) = types {
                if !types.iter().any(|t| t == &edge.edge_type) {
                    continue;
                }
            }
            edges.push(edge);
        }
        Ok(edges)
    }

    /// Scan edges by optional type, with a row cap
    pub fn find_edges(
        &self,
        edge_type: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<GraphEdge>, GraphError> {
        let conn = self.read()?;
        let cap = limit.unwrap_or(usize::MAX) as i64;
        let mut edges = Vec::new();

        match edge_type {
            Some(t) => {
                let mut stmt = conn.prepare(
                    "SELECT from_id, to_id, edge_type, properties, created_at
                     FROM graph_edges WHERE edge_type = ?1 ORDER BY from_id, to_id LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![t, cap], row_to_edge)?;
                for row in rows {
                    edges.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT from_id, to_id, edge_type, properties, created_at
                     FROM graph_edges ORDER BY from_id, to_id LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![cap], row_to_edge)?;
                for row in rows {
                    edges.push(row?);
                }
            }
        }
        Ok(edges)
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Nodes reachable in exactly 1..=depth hops, with shortest-path depth
    ///
    /// Cycles are dropped by the visited set. Visiting more than
    /// `max_nodes` nodes aborts with `BudgetExceeded`; the partial frontier
    /// is not returned.
    pub fn neighbours(
        &self,
        start: &str,
        types: Option<&[String]>,
        direction: Direction,
        depth: usize,
        max_nodes: usize,
    ) -> Result<Vec<Neighbour>, GraphError> {
        if depth == 0 {
            return Ok(vec![]);
        }
        if !self.contains_node(start)? {
            return Err(GraphError::NodeNotFound(start.to_string()));
        }

        let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(start.to_string(), 0)]);
        let mut reached: Vec<(String, usize)> = Vec::new();

        while let Some((current, hops)) = queue.pop_front() {
            if hops >= depth {
                continue;
            }
            for edge in self.edges_of(&current, direction, types)? {
                let next = if edge.from == current {
                    edge.to
                } else {
                    edge.from
                };
                if !visited.insert(next.clone()) {
                    continue;
                }
                if visited.len() > max_nodes {
                    return Err(GraphError::BudgetExceeded {
                        visited: visited.len(),
                        budget: max_nodes,
                    });
                }
                reached.push((next.clone(), hops + 1));
                queue.push_back((next, hops + 1));
            }
        }

        let mut neighbours = Vec::with_capacity(reached.len());
        for (id, depth) in reached {
            if let Some(node) = self.get_node(&id)? {
                neighbours.push(Neighbour { node, depth });
            }
        }
        Ok(neighbours)
    }

    // ------------------------------------------------------------------
    // Stats & maintenance
    // ------------------------------------------------------------------

    /// Node and edge counts, broken down by type
    pub fn stats(&self) -> Result<GraphCounts, GraphError> {
        let conn = self.read()?;
        let mut counts = GraphCounts::default();

        let mut stmt =
            conn.prepare("SELECT node_type, COUNT(*) FROM graph_nodes GROUP BY node_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (node_type, count) = row?;
            counts.node_count += count as usize;
            counts.nodes_by_type.insert(node_type, count as usize);
        }

        let mut stmt =
            conn.prepare("SELECT edge_type, COUNT(*) FROM graph_edges GROUP BY edge_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (edge_type, count) = row?;
            counts.edge_count += count as usize;
            counts.edges_by_type.insert(edge_type, count as usize);
        }

        Ok(counts)
    }

    /// Run the SQLite optimizer (compaction pass)
    pub fn optimize(&self) -> Result<(), GraphError> {
        self.write()?.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }

    /// Checkpoint the WAL so a clean close leaves no journal behind
    pub fn checkpoint(&self) -> Result<(), GraphError> {
        self.write()?
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphNode> {
    let properties: String = row.get(2)?;
    Ok(GraphNode {
        id: row.get(0)?,
        node_type: row.get(1)?,
        properties: parse_properties(&properties),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphEdge> {
    let properties: String = row.get(3)?;
    Ok(GraphEdge {
        from: row.get(0)?,
        to: row.get(1)?,
        edge_type: row.get(2)?,
        properties: parse_properties(&properties),
        created_at: row.get(4)?,
    })
}

fn parse_properties(raw: &str) -> Properties {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => {
            tracing::warn!("unreadable property blob, substituting empty map");
            Properties::new()
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EDGE_RELATES_TO, NODE_DOCUMENT};

    fn open_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(&dir.path().join("graph.db")).unwrap();
        (dir, store)
    }

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_upsert_and_get_node() {
        let (_dir, store) = open_store();
        store
            .upsert_node("kb:a", NODE_DOCUMENT, &props(&[("title", "Alpha")]))
            .unwrap();

        let node = store.get_node("kb:a").unwrap().unwrap();
        assert_eq!(node.node_type, NODE_DOCUMENT);
        assert_eq!(node.properties["title"], "Alpha");

        // Upsert replaces properties
        store
            .upsert_node("kb:a", NODE_DOCUMENT, &props(&[("title", "Alpha v2")]))
            .unwrap();
        let node = store.get_node("kb:a").unwrap().unwrap();
        assert_eq!(node.properties["title"], "Alpha v2");
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let (_dir, store) = open_store();
        store
            .upsert_node("kb:a", NODE_DOCUMENT, &Properties::new())
            .unwrap();

        let result = store.upsert_edge("kb:a", "kb:missing", EDGE_RELATES_TO, &Properties::new());
        assert!(matches!(result, Err(GraphError::NodeNotFound(_))));
    }

    #[test]
    fn test_duplicate_edge_is_idempotent() {
        let (_dir, store) = open_store();
        store
            .upsert_node("kb:a", NODE_DOCUMENT, &Properties::new())
            .unwrap();
        store
            .upsert_node("kb:b", NODE_DOCUMENT, &Properties::new())
            .unwrap();

        store
            .upsert_edge("kb:a", "kb:b", EDGE_RELATES_TO, &Properties::new())
            .unwrap();
        store
            .upsert_edge("kb:a", "kb:b", EDGE_RELATES_TO, &props(&[("weight", "2")]))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.edge_count, 1);

        let edges = store.edges_of("kb:a", Direction::Outgoing, None).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].properties["weight"], "2");
    }

    #[test]
    fn test_delete_node_cascades_edges() {
        let (_dir, store) = open_store();
        store
            .upsert_node("kb:a", NODE_DOCUMENT, &Properties::new())
            .unwrap();
        store
            .upsert_node("kb:b", NODE_DOCUMENT, &Properties::new())
            .unwrap();
        store
            .upsert_edge("kb:a", "kb:b", EDGE_RELATES_TO, &Properties::new())
            .unwrap();

        assert!(store.delete_node("kb:a").unwrap());
        assert!(store.get_node("kb:a").unwrap().is_none());
        assert_eq!(store.stats().unwrap().edge_count, 0);
        // Second delete reports absence
        assert!(!store.delete_node("kb:a").unwrap());
    }

    #[test]
    fn test_neighbours_depth_and_cycles() {
        let (_dir, store) = open_store();
        for id in ["n:1", "n:2", "n:3"] {
            store.upsert_node(id, NODE_DOCUMENT, &Properties::new()).unwrap();
        }
        store
            .upsert_edge("n:1", "n:2", EDGE_RELATES_TO, &Properties::new())
            .unwrap();
        store
            .upsert_edge("n:2", "n:3", EDGE_RELATES_TO, &Properties::new())
            .unwrap();
        // Cycle back to the start
        store
            .upsert_edge("n:3", "n:1", EDGE_RELATES_TO, &Properties::new())
            .unwrap();

        let one_hop = store
            .neighbours("n:1", None, Direction::Outgoing, 1, 100)
            .unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].node.id, "n:2");
        assert_eq!(one_hop[0].depth, 1);

        let two_hops = store
            .neighbours("n:1", None, Direction::Outgoing, 2, 100)
            .unwrap();
        assert_eq!(two_hops.len(), 2);
        let n3 = two_hops.iter().find(|n| n.node.id == "n:3").unwrap();
        assert_eq!(n3.depth, 2);

        // The cycle never revisits n:1
        let deep = store
            .neighbours("n:1", None, Direction::Outgoing, 10, 100)
            .unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn test_neighbours_budget_exceeded() {
        let (_dir, store) = open_store();
        store
            .upsert_node("hub", NODE_DOCUMENT, &Properties::new())
            .unwrap();
        for i in 0..10 {
            let id = format!("spoke-{i}");
            store.upsert_node(&id, NODE_DOCUMENT, &Properties::new()).unwrap();
            store
                .upsert_edge("hub", &id, EDGE_RELATES_TO, &Properties::new())
                .unwrap();
        }

        let result = store.neighbours("hub", None, Direction::Outgoing, 1, 4);
        assert!(matches!(result, Err(GraphError::BudgetExceeded { .. })));
    }

    #[test]
    fn test_unknown_edge_type_traverses_empty() {
        let (_dir, store) = open_store();
        store
            .upsert_node("kb:a", NODE_DOCUMENT, &Properties::new())
            .unwrap();
        store
            .upsert_node("kb:b", NODE_DOCUMENT, &Properties::new())
            .unwrap();
        store
            .upsert_edge("kb:a", "kb:b", EDGE_RELATES_TO, &Properties::new())
            .unwrap();

        let neighbours = store
            .neighbours(
                "kb:a",
                Some(&["NO_SUCH_TYPE".to_string()]),
                Direction::Outgoing,
                2,
                100,
            )
            .unwrap();
        assert!(neighbours.is_empty());
    }

    #[test]
    fn test_stats_by_type() {
        let (_dir, store) = open_store();
        store
            .upsert_node("kb:a", NODE_DOCUMENT, &Properties::new())
            .unwrap();
        store.upsert_node("t:x", "Tag", &Properties::new()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.nodes_by_type[NODE_DOCUMENT], 1);
        assert_eq!(stats.nodes_by_type["Tag"], 1);
    }
}
