//! Collection handle
//!
//! A collection owns one directory on disk:
//!
//! ```text
//! <root>/<name>/
//!   manifest.json   name, dimension, metric, createdAt, version
//!   vectors.idx     HNSW index (+ .meta.json metadata sidecar)
//!   graph.db        property graph
//!   journal.log     unified-transaction journal
//! ```
//!
//! Opening a collection replays an unfinished journal before any operation
//! is served: committed transactions are redone on whichever side is
//! missing, then an orphan sweep undoes partial state with no record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{HnswConfig, Metric};
use crate::error::{EngramError, Result};
use crate::graph::{GraphStore, NODE_DOCUMENT};
use crate::journal::{Journal, JournalRecord};
use crate::vector::{VectorRecord, VectorStore};

/// Highest manifest version this engine understands
pub const MANIFEST_VERSION: u32 = 1;

/// Vector index file name
pub const VECTORS_FILE: &str = "vectors.idx";

/// Graph database file name
pub const GRAPH_FILE: &str = "graph.db";

/// Journal file name
pub const JOURNAL_FILE: &str = "journal.log";

/// Manifest file name
pub const MANIFEST_FILE: &str = "manifest.json";

// ============================================================================
// MANIFEST
// ============================================================================

/// Per-collection manifest persisted as `manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Collection name
    pub name: String,
    /// Vector dimension, fixed at creation
    pub dimension: usize,
    /// Distance metric, fixed at creation
    pub metric: Metric,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// On-disk format version
    pub version: u32,
    /// Optional human description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional tag set
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Manifest {
    fn load(path: &Path) -> Result<Self> {
        let payload = std::fs::read(path)?;
        let manifest: Manifest = serde_json::from_slice(&payload)
            .map_err(|e| EngramError::StorageFailure(format!("bad manifest: {e}")))?;
        if manifest.version > MANIFEST_VERSION {
            return Err(EngramError::UnsupportedVersion {
                found: manifest.version,
                supported: MANIFEST_VERSION,
            });
        }
        Ok(manifest)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Caller-facing snapshot of a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    /// Collection name
    pub name: String,
    /// Vector dimension
    pub dimension: usize,
    /// Distance metric
    pub metric: Metric,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Optional description
    pub description: Option<String>,
    /// Tag set
    pub tags: Vec<String>,
    /// Vector items currently stored
    pub vector_count: usize,
    /// Document nodes currently stored
    pub document_count: usize,
}

// ============================================================================
// COLLECTION
// ============================================================================

/// One open collection: vector store, graph store, journal, writer lock
pub struct Collection {
    manifest: Manifest,
    dir: PathBuf,
    vector: RwLock<VectorStore>,
    graph: GraphStore,
    journal: Journal,
    /// Serialises writers; transactions hold this across both stores
    writer: Mutex<()>,
    /// Deferred access-count bumps, drained by the compaction pass
    pending_access: Mutex<HashMap<String, u64>>,
}

impl Collection {
    /// Create a fresh collection directory
    pub fn create(
        dir: PathBuf,
        name: &str,
        dimension: usize,
        metric: Metric,
        hnsw: &HnswConfig,
        description: Option<String>,
        tags: Vec<String>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let manifest = Manifest {
            name: name.to_string(),
            dimension,
            metric,
            created_at: Utc::now(),
            version: MANIFEST_VERSION,
            description,
            tags,
        };
        manifest.save(&dir.join(MANIFEST_FILE))?;

        let vector = VectorStore::new(dimension, metric, hnsw).map_err(EngramError::from)?;
        let graph = GraphStore::open(&dir.join(GRAPH_FILE)).map_err(EngramError::from)?;
        let journal = Journal::new(dir.join(JOURNAL_FILE));

        Ok(Self {
            manifest,
            dir,
            vector: RwLock::new(vector),
            graph,
            journal,
            writer: Mutex::new(()),
            pending_access: Mutex::new(HashMap::new()),
        })
    }

    /// Open an existing collection, running crash recovery first
    pub fn open(dir: PathBuf, hnsw: &HnswConfig) -> Result<Self> {
        let manifest = Manifest::load(&dir.join(MANIFEST_FILE))?;

        let vectors_path = dir.join(VECTORS_FILE);
        let vector = if vectors_path.with_extension("meta.json").exists() {
            VectorStore::load(&vectors_path, hnsw).map_err(EngramError::from)?
        } else {
            VectorStore::new(manifest.dimension, manifest.metric, hnsw)
                .map_err(EngramError::from)?
        };

        let graph = GraphStore::open(&dir.join(GRAPH_FILE)).map_err(EngramError::from)?;
        let journal = Journal::new(dir.join(JOURNAL_FILE));

        let collection = Self {
            manifest,
            dir,
            vector: RwLock::new(vector),
            graph,
            journal,
            writer: Mutex::new(()),
            pending_access: Mutex::new(HashMap::new()),
        };
        collection.recover()?;
        Ok(collection)
    }

    /// Redo committed transactions, then sweep unexplained partial state
    fn recover(&self) -> Result<()> {
        let records = self.journal.replay()?;
        if !records.is_empty() {
            tracing::info!(
                collection = %self.manifest.name,
                records = records.len(),
                "replaying journal"
            );
            let mut vector = self.vector_write()?;
            for record in records {
                match record {
                    JournalRecord::AddDocument {
                        ns_id,
                        vector: embedding,
                        metadata,
                        node_properties,
                        ..
                    } => {
                        if !vector.contains(&ns_id) {
                            vector
                                .insert(VectorRecord::new(&ns_id, embedding, metadata))
                                .map_err(EngramError::from)?;
                        }
                        self.graph
                            .upsert_node(&ns_id, NODE_DOCUMENT, &node_properties)
                            .map_err(EngramError::from)?;
                    }
                    JournalRecord::DeleteDocument { ns_id, .. } => {
                        vector.delete(&ns_id).map_err(EngramError::from)?;
                        self.graph.delete_node(&ns_id).map_err(EngramError::from)?;
                    }
                    JournalRecord::Abort { .. } => {}
                }
            }
        }

        self.sweep_orphans()?;

        // Recovery leaves both stores durable, so the journal can go
        self.vector_read()?
            .save(&self.dir.join(VECTORS_FILE))
            .map_err(EngramError::from)?;
        self.journal.truncate()?;
        Ok(())
    }

    /// Undo partial state not explained by any journal record
    ///
    /// A vector item without its Document node (or the reverse) can only be
    /// the residue of a transaction whose record never became durable.
    fn sweep_orphans(&self) -> Result<()> {
        let mut vector = self.vector_write()?;

        let orphan_items: Vec<String> = vector
            .records()
            .map(|r| r.id.clone())
            .filter(|id| {
                !self
                    .graph
                    .contains_node(id)
                    .unwrap_or(true)
            })
            .collect();
        for id in orphan_items {
            tracing::warn!(id = %id, "undoing orphan vector item");
            vector.delete(&id).map_err(EngramError::from)?;
        }

        let documents = self
            .graph
            .find_nodes(Some(NODE_DOCUMENT), None)
            .map_err(EngramError::from)?;
        for node in documents {
            if !vector.contains(&node.id) {
                tracing::warn!(id = %node.id, "undoing orphan document node");
                self.graph.delete_node(&node.id).map_err(EngramError::from)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Collection name
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Vector dimension
    pub fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    /// Distance metric
    pub fn metric(&self) -> Metric {
        self.manifest.metric
    }

    /// The collection directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The graph store
    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// The journal
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Read access to the vector store
    pub fn vector_read(&self) -> Result<RwLockReadGuard<'_, VectorStore>> {
        self.vector
            .read()
            .map_err(|_| EngramError::StorageFailure("vector lock poisoned".into()))
    }

    /// Write access to the vector store
    pub fn vector_write(&self) -> Result<RwLockWriteGuard<'_, VectorStore>> {
        self.vector
            .write()
            .map_err(|_| EngramError::StorageFailure("vector lock poisoned".into()))
    }

    /// Serialise a writer; held across both stores for a whole transaction
    pub fn writer_lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| EngramError::StorageFailure("writer lock poisoned".into()))
    }

    /// Prefix an unqualified document id with this collection's namespace
    pub fn namespace_id(&self, id: &str) -> String {
        let prefix = format!("{}:", self.manifest.name);
        if id.starts_with(&prefix) {
            id.to_string()
        } else {
            format!("{prefix}{id}")
        }
    }

    // ------------------------------------------------------------------
    // Access counting (eventually consistent)
    // ------------------------------------------------------------------

    /// Note one retrieval of an item; applied in batches later
    pub fn note_access(&self, id: &str) {
        if let Ok(mut pending) = self.pending_access.lock() {
            *pending.entry(id.to_string()).or_insert(0) += 1;
        }
    }

    /// Apply deferred access counts to the vector store
    pub fn drain_access(&self) -> Result<usize> {
        let drained: HashMap<String, u64> = {
            let mut pending = self
                .pending_access
                .lock()
                .map_err(|_| EngramError::StorageFailure("access lock poisoned".into()))?;
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return Ok(0);
        }

        let applied = drained.len();
        let mut vector = self.vector_write()?;
        for (id, count) in drained {
            vector.record_access(&id, count);
        }
        Ok(applied)
    }

    // ------------------------------------------------------------------
    // Flush / info
    // ------------------------------------------------------------------

    /// Durably persist the vector store and truncate the journal
    pub fn flush(&self) -> Result<()> {
        self.drain_access()?;
        self.vector_read()?
            .save(&self.dir.join(VECTORS_FILE))
            .map_err(EngramError::from)?;
        self.journal.truncate()?;
        self.graph.checkpoint().map_err(EngramError::from)?;
        Ok(())
    }

    /// Snapshot counts and configuration
    pub fn info(&self) -> Result<CollectionInfo> {
        let vector_count = self.vector_read()?.len();
        let document_count = self
            .graph
            .stats()
            .map_err(EngramError::from)?
            .nodes_by_type
            .get(NODE_DOCUMENT)
            .copied()
            .unwrap_or(0);
        Ok(CollectionInfo {
            name: self.manifest.name.clone(),
            dimension: self.manifest.dimension,
            metric: self.manifest.metric,
            created_at: self.manifest.created_at,
            description: self.manifest.description.clone(),
            tags: self.manifest.tags.clone(),
            vector_count,
            document_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Properties;
    use crate::vector::ItemMetadata;

    fn basis(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn create_collection(dir: &Path) -> Collection {
        Collection::create(
            dir.join("kb"),
            "kb",
            64,
            Metric::Cosine,
            &HnswConfig::default(),
            None,
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_create_then_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let collection = create_collection(dir.path());
            assert_eq!(collection.dimension(), 64);
            collection.flush().unwrap();
        }

        let reopened = Collection::open(dir.path().join("kb"), &HnswConfig::default()).unwrap();
        assert_eq!(reopened.name(), "kb");
        assert_eq!(reopened.metric(), Metric::Cosine);
    }

    #[test]
    fn test_newer_manifest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let collection_dir = dir.path().join("kb");
        {
            let collection = create_collection(dir.path());
            collection.flush().unwrap();
        }

        // Bump the on-disk version past what the engine supports
        let manifest_path = collection_dir.join(MANIFEST_FILE);
        let mut manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        manifest["version"] = serde_json::json!(MANIFEST_VERSION + 1);
        std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let result = Collection::open(collection_dir, &HnswConfig::default());
        assert!(matches!(
            result,
            Err(EngramError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_recovery_redoes_committed_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let collection_dir = dir.path().join("kb");
        {
            let collection = create_collection(dir.path());
            // Commit record is durable, but neither store was written:
            // simulates a crash right after the journal append
            collection
                .journal()
                .append(&JournalRecord::AddDocument {
                    txn: "t1".into(),
                    ns_id: "kb:c".into(),
                    vector: basis(64, 0),
                    metadata: ItemMetadata::new("gamma", "kb"),
                    node_properties: Properties::new(),
                })
                .unwrap();
            // No flush: drop with the journal still dirty
        }

        let reopened = Collection::open(collection_dir, &HnswConfig::default()).unwrap();
        assert!(reopened.vector_read().unwrap().contains("kb:c"));
        assert!(reopened.graph().contains_node("kb:c").unwrap());
        // Recovery leaves a clean journal
        assert!(!reopened.journal().is_dirty());
    }

    #[test]
    fn test_recovery_undoes_partial_state_without_record() {
        let dir = tempfile::tempdir().unwrap();
        let collection_dir = dir.path().join("kb");
        {
            let collection = create_collection(dir.path());
            // Vector side written without a journal record (torn transaction)
            collection
                .vector_write()
                .unwrap()
                .insert(VectorRecord::new(
                    "kb:orphan",
                    basis(64, 1),
                    ItemMetadata::new("orphan", "kb"),
                ))
                .unwrap();
            collection
                .vector_read()
                .unwrap()
                .save(&collection.dir().join(VECTORS_FILE))
                .unwrap();
        }

        let reopened = Collection::open(collection_dir, &HnswConfig::default()).unwrap();
        assert!(!reopened.vector_read().unwrap().contains("kb:orphan"));
    }

    #[test]
    fn test_namespace_id_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let collection = create_collection(dir.path());
        assert_eq!(collection.namespace_id("doc-1"), "kb:doc-1");
        assert_eq!(collection.namespace_id("kb:doc-1"), "kb:doc-1");
    }

    #[test]
    fn test_access_counts_drain_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let collection = create_collection(dir.path());
        collection
            .vector_write()
            .unwrap()
            .insert(VectorRecord::new(
                "kb:a",
                basis(64, 0),
                ItemMetadata::new("alpha", "kb"),
            ))
            .unwrap();

        collection.note_access("kb:a");
        collection.note_access("kb:a");
        assert_eq!(
            collection
                .vector_read()
                .unwrap()
                .get("kb:a")
                .unwrap()
                .access_count,
            0
        );

        collection.drain_access().unwrap();
        assert_eq!(
            collection
                .vector_read()
                .unwrap()
                .get("kb:a")
                .unwrap()
                .access_count,
            2
        );
    }
}
