//! Collection registry
//!
//! Maps collection names to open handles and owns the storage-root layout.
//! Every subdirectory of the root carrying a `manifest.json` is a
//! collection; all of them are opened (and crash-recovered) when the
//! registry opens. Ids are namespaced with the `"<name>:"` prefix rule, and
//! a `default` collection is created lazily on first use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::collection::{Collection, CollectionInfo, MANIFEST_FILE};
use crate::config::{EngineConfig, Metric, validate_dimension};
use crate::error::{EngramError, Result};
use crate::vector::VectorRecord;

/// Name of the implicitly created collection
pub const DEFAULT_COLLECTION: &str = "default";

/// Outcome of a migrating delete
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Items copied into the target collection
    pub migrated: usize,
    /// Items that failed to copy (already present, bad dimension, ...)
    pub failed: Vec<String>,
}

/// Open collections keyed by name
pub struct CollectionRegistry {
    root: PathBuf,
    config: EngineConfig,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl CollectionRegistry {
    /// Open the registry, scanning and recovering every collection under `root`
    pub fn open(root: PathBuf, config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&root)?;

        let mut collections = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let dir = entry.path();
            if !dir.is_dir() || !dir.join(MANIFEST_FILE).exists() {
                continue;
            }
            let collection = Collection::open(dir, &config.hnsw)?;
            collections.insert(collection.name().to_string(), Arc::new(collection));
        }

        tracing::debug!(
            root = %root.display(),
            collections = collections.len(),
            "registry opened"
        );
        Ok(Self {
            root,
            config,
            collections: RwLock::new(collections),
        })
    }

    fn guard_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(EngramError::invalid("collection name cannot be empty"));
        }
        if name.contains(':') || name.contains('/') || name.contains('\\') {
            return Err(EngramError::invalid(format!(
                "collection name '{name}' contains reserved characters"
            )));
        }
        Ok(())
    }

    /// Create a collection; fails with `Conflict` when the name is taken
    pub fn create(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
        description: Option<String>,
        tags: Vec<String>,
    ) -> Result<Arc<Collection>> {
        Self::guard_name(name)?;
        validate_dimension(dimension)?;

        let mut collections = self
            .collections
            .write()
            .map_err(|_| EngramError::StorageFailure("registry lock poisoned".into()))?;
        if collections.contains_key(name) {
            return Err(EngramError::Conflict(format!(
                "collection already exists: {name}"
            )));
        }

        let collection = Arc::new(Collection::create(
            self.root.join(name),
            name,
            dimension,
            metric,
            &self.config.hnsw,
            description,
            tags,
        )?);
        collections.insert(name.to_string(), Arc::clone(&collection));
        tracing::info!(collection = name, dimension, metric = %metric, "collection created");
        Ok(collection)
    }

    /// Look up a collection by name
    pub fn get(&self, name: &str) -> Result<Option<Arc<Collection>>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| EngramError::StorageFailure("registry lock poisoned".into()))?;
        Ok(collections.get(name).cloned())
    }

    /// Look up a collection, surfacing `NotFound` when absent
    pub fn expect(&self, name: &str) -> Result<Arc<Collection>> {
        self.get(name)?
            .ok_or_else(|| EngramError::not_found("collection", name))
    }

    /// The `default` collection, created on first use
    pub fn default_collection(&self) -> Result<Arc<Collection>> {
        if let Some(collection) = self.get(DEFAULT_COLLECTION)? {
            return Ok(collection);
        }
        match self.create(
            DEFAULT_COLLECTION,
            self.config.default_dimension,
            self.config.default_metric,
            None,
            vec![],
        ) {
            Ok(collection) => Ok(collection),
            // Lost a race with a concurrent auto-create
            Err(EngramError::Conflict(_)) => self.expect(DEFAULT_COLLECTION),
            Err(e) => Err(e),
        }
    }

    /// Unordered snapshot of every collection
    pub fn list(&self) -> Result<Vec<CollectionInfo>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| EngramError::StorageFailure("registry lock poisoned".into()))?;
        collections.values().map(|c| c.info()).collect()
    }

    /// All open handles (for stats and background passes)
    pub fn handles(&self) -> Result<Vec<Arc<Collection>>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| EngramError::StorageFailure("registry lock poisoned".into()))?;
        Ok(collections.values().cloned().collect())
    }

    /// Delete a collection, optionally migrating its data first
    ///
    /// Migration requires the target to share the source's dimension and
    /// metric; the copy reports per-item failures instead of aborting.
    pub fn delete(&self, name: &str, migrate_to: Option<&str>) -> Result<MigrationReport> {
        let source = self.expect(name)?;
        let mut report = MigrationReport::default();

        if let Some(target_name) = migrate_to {
            if target_name == name {
                return Err(EngramError::Conflict(
                    "cannot migrate a collection into itself".into(),
                ));
            }
            let target = self.expect(target_name)?;
            if target.dimension() != source.dimension() {
                return Err(EngramError::Conflict(format!(
                    "dimension mismatch migrating {name} ({}) into {target_name} ({})",
                    source.dimension(),
                    target.dimension()
                )));
            }
            if target.metric() != source.metric() {
                return Err(EngramError::Conflict(format!(
                    "metric mismatch migrating {name} into {target_name}"
                )));
            }
            report = migrate(&source, &target)?;
        }

        let mut collections = self
            .collections
            .write()
            .map_err(|_| EngramError::StorageFailure("registry lock poisoned".into()))?;
        collections.remove(name);
        drop(collections);

        // The handle may still be referenced by in-flight readers; the
        // directory removal below makes the collection unreachable for any
        // subsequent lookup.
        std::fs::remove_dir_all(self.root.join(name))?;
        tracing::info!(collection = name, "collection deleted");
        Ok(report)
    }
}

/// Copy every document of `source` into `target`, rewriting id prefixes
fn migrate(source: &Collection, target: &Collection) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    let source_prefix = format!("{}:", source.name());

    let records: Vec<VectorRecord> = source.vector_read()?.records().cloned().collect();
    let _writer = target.writer_lock()?;

    for mut record in records {
        let local = record
            .id
            .strip_prefix(&source_prefix)
            .unwrap_or(&record.id)
            .to_string();
        let new_id = target.namespace_id(&local);

        let node_properties = source
            .graph()
            .get_node(&record.id)
            .map_err(EngramError::from)?
            .map(|n| n.properties)
            .unwrap_or_default();

        record.id = new_id.clone();
        record.metadata.collection = target.name().to_string();

        let inserted = {
            let mut vector = target.vector_write()?;
            vector.insert(record)
        };
        match inserted {
            Ok(()) => {
                target
                    .graph()
                    .upsert_node(&new_id, crate::graph::NODE_DOCUMENT, &node_properties)
                    .map_err(EngramError::from)?;
                report.migrated += 1;
            }
            Err(e) => {
                tracing::warn!(id = %new_id, error = %e, "migration skipped item");
                report.failed.push(new_id);
            }
        }
    }

    // Second pass: carry over edges whose endpoints both migrated
    let edges = source
        .graph()
        .find_edges(None, None)
        .map_err(EngramError::from)?;
    for edge in edges {
        let rewrite = |id: &str| {
            let local = id.strip_prefix(&source_prefix).unwrap_or(id);
            target.namespace_id(local)
        };
        let from = rewrite(&edge.from);
        let to = rewrite(&edge.to);
        if let Err(e) = target
            .graph()
            .upsert_edge(&from, &to, &edge.edge_type, &edge.properties)
        {
            tracing::debug!(from = %from, to = %to, error = %e, "edge not migrated");
        }
    }

    target.flush()?;
    Ok(report)
}
