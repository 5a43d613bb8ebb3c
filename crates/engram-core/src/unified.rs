//! Unified memory facade
//!
//! The single entry point callers see. Writes fan out to the vector index
//! and the property graph under one logical transaction whose commit point
//! is a durable journal record; reads are planned by the semantic router,
//! executed against the vector index (optionally expanded through the
//! graph), fused by reciprocal rank across collections, and optionally
//! reranked by the cognitive layer.
//!
//! Lock discipline: writers serialise per collection on the writer lock and
//! acquire store locks in the fixed order (vector, graph). Searches take
//! only read locks and never wait on one another.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cognitive::{
    CognitiveEngine, CognitiveStats, GraphAttentionReranker, NoopReranker, ReasoningPattern,
    RerankCandidate, Reranker, Trajectory,
};
use crate::collection::{Collection, CollectionInfo};
use crate::config::{EngineConfig, Metric, RRF_K};
use crate::ctx::OpContext;
use crate::embeddings::{EmbeddingError, EmbeddingProvider, HashingEmbedder};
use crate::error::{EngramError, Result};
use crate::graph::{
    Direction, GraphCounts, GraphQueryResult, NODE_DOCUMENT, Properties, cypher,
};
use crate::journal::JournalRecord;
use crate::registry::{CollectionRegistry, MigrationReport};
use crate::router::{ExecutionPlan, IntentClassifier, KeywordClassifier, RouteDecision};
use crate::vector::{ItemMetadata, MetadataFilter, VectorHit, VectorRecord, VectorStoreStats};

// ============================================================================
// INPUT / OUTPUT TYPES
// ============================================================================

/// A document handed to `add_document`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Caller-chosen local id (namespaced with the collection on insert)
    pub id: String,
    /// Full text (embedded on insert)
    pub text: String,
    /// Optional title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional origin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Optional category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Tag set
    #[serde(default)]
    pub tags: Vec<String>,
    /// Open extension map carried into item metadata
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Document {
    /// A document with just an id and text
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            title: None,
            source: None,
            category: None,
            tags: Vec::new(),
            extra: HashMap::new(),
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Options shaping a `search` call
///
/// Unset fields fall back to the routed execution plan.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Result count; defaults to the plan's k
    pub k: Option<usize>,
    /// Vector weight alpha in the combined score
    pub vector_weight: Option<f32>,
    /// Whether to collect related graph nodes (None = follow the plan)
    pub include_related: Option<bool>,
    /// Graph expansion depth (None = follow the plan; 0 = vector-only)
    pub graph_depth: Option<usize>,
    /// Metadata predicate applied inside the vector search
    pub filters: Option<MetadataFilter>,
    /// Whether to rerank (None = follow the plan)
    pub rerank: Option<bool>,
    /// Target collections; None = the default collection
    pub collections: Option<Vec<String>>,
    /// Accept vector-only results when the graph side fails
    pub allow_partial: bool,
    /// Pin a plan instead of routing
    pub plan: Option<ExecutionPlan>,
}

/// A related graph node attached to a result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedNode {
    /// Node id
    pub id: String,
    /// Node type
    pub node_type: String,
    /// Shortest-path depth from the result's document node
    pub depth: usize,
}

/// One fused search result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedResult {
    /// Namespaced document id
    pub id: String,
    /// Title, when present
    pub title: Option<String>,
    /// Chunk text
    pub text: String,
    /// Source, when present
    pub source: Option<String>,
    /// Normalised vector similarity in [0, 1]
    pub vector_score: f32,
    /// Graph-neighbourhood score in [0, 1]
    pub graph_score: f32,
    /// Fused score used for ordering
    pub combined_score: f32,
    /// Related nodes, present when expansion ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_nodes: Option<Vec<RelatedNode>>,
    /// Full item metadata
    pub metadata: ItemMetadata,
}

/// Search output: results plus provenance
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Fused results, best first
    pub results: Vec<UnifiedResult>,
    /// True when the graph side failed and the caller allowed partials
    pub partial: bool,
    /// The routing decision that shaped execution
    pub route: RouteDecision,
}

/// Per-item outcome of a batched add
#[derive(Debug)]
pub struct BatchOutcome {
    /// The document's local id
    pub doc_id: String,
    /// Namespaced id on success, error otherwise
    pub outcome: Result<String>,
}

/// Composite statistics across every subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeStats {
    /// Per-collection snapshots
    pub collections: Vec<CollectionInfo>,
    /// Vector store stats per collection
    pub vector: HashMap<String, VectorStoreStats>,
    /// Graph counts per collection
    pub graph: HashMap<String, GraphCounts>,
    /// Cognitive layer stats
    pub cognitive: CognitiveStats,
}

/// What one `tick()` pass did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Collections visited
    pub collections: usize,
    /// Vector items whose tier changed
    pub tiers_moved: usize,
    /// Access-count updates applied
    pub accesses_applied: usize,
    /// Reasoning patterns in the bank after clustering
    pub patterns: usize,
}

// ============================================================================
// UNIFIED MEMORY
// ============================================================================

/// The atomic facade over vector index, graph store, router, and cognition
pub struct UnifiedMemory {
    config: EngineConfig,
    registry: CollectionRegistry,
    embedder: Arc<dyn EmbeddingProvider>,
    router: Box<dyn IntentClassifier>,
    reranker: Box<dyn Reranker>,
    cognitive: CognitiveEngine,
    query_cache: Mutex<LruCache<(usize, String), Vec<f32>>>,
    closed: AtomicBool,
}

impl UnifiedMemory {
    /// Open an engine at `root` with the deterministic hashing embedder
    pub fn open(root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        Self::open_with_provider(root, config, Arc::new(HashingEmbedder::new()))
    }

    /// Open an engine with a caller-supplied embedding provider
    pub fn open_with_provider(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let root = root.into();

        let registry = CollectionRegistry::open(root.clone(), config.clone())?;
        let cognitive = CognitiveEngine::open(&root, &config.cognitive)?;
        let reranker: Box<dyn Reranker> = if config.cognitive.enabled {
            Box::new(GraphAttentionReranker::default())
        } else {
            Box::new(NoopReranker)
        };

        let cache_size = NonZeroUsize::new(config.query_cache_size.max(1))
            .unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            router: Box::new(KeywordClassifier::new(&config.router)),
            reranker,
            cognitive,
            registry,
            embedder,
            query_cache: Mutex::new(LruCache::new(cache_size)),
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngramError::StorageFailure("engine is closed".into()));
        }
        Ok(())
    }

    fn resolve_collection(&self, name: Option<&str>) -> Result<Arc<Collection>> {
        match name {
            None => self.registry.default_collection(),
            Some(name) => self.registry.expect(name),
        }
    }

    /// Internal handle accessor for the ingestion pipeline
    pub(crate) fn collection_handle(&self, name: Option<&str>) -> Result<Arc<Collection>> {
        self.ensure_open()?;
        self.resolve_collection(name)
    }

    /// Embed with bounded retries; only backend trouble is retried
    fn embed_with_retry(&self, text: &str, dimension: usize) -> Result<Vec<f32>> {
        let mut delay = std::time::Duration::from_millis(self.config.embed_retry_base_ms);
        let mut last: Option<EmbeddingError> = None;
        for attempt in 0..=self.config.embed_max_retries {
            match self.embedder.embed_one(text, dimension) {
                Ok(vector) => return Ok(vector),
                Err(e @ EmbeddingError::BackendUnavailable(_)) => {
                    tracing::warn!(attempt, error = %e, "embedding attempt failed");
                    last = Some(e);
                    if attempt < self.config.embed_max_retries {
                        std::thread::sleep(delay);
                        delay *= 2;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last
            .map(EngramError::from)
            .unwrap_or_else(|| EngramError::EmbeddingBackendUnavailable("no attempts".into())))
    }

    /// Cached query embedding (repeated searches skip the backend)
    fn embed_query(&self, text: &str, dimension: usize) -> Result<Vec<f32>> {
        let key = (dimension, text.to_string());
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(&key) {
                return Ok(vector.clone());
            }
        }
        let vector = self.embed_with_retry(text, dimension)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(key, vector.clone());
        }
        Ok(vector)
    }

    // ------------------------------------------------------------------
    // Collection management
    // ------------------------------------------------------------------

    /// Create a collection
    pub fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
        description: Option<String>,
        tags: Vec<String>,
    ) -> Result<CollectionInfo> {
        self.ensure_open()?;
        self.registry
            .create(name, dimension, metric, description, tags)?
            .info()
    }

    /// Delete a collection, optionally migrating its data into another
    pub fn delete_collection(
        &self,
        name: &str,
        migrate_to: Option<&str>,
    ) -> Result<MigrationReport> {
        self.ensure_open()?;
        self.registry.delete(name, migrate_to)
    }

    /// Unordered snapshot of every collection
    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        self.ensure_open()?;
        self.registry.list()
    }

    // ------------------------------------------------------------------
    // Document writes
    // ------------------------------------------------------------------

    /// Add a document atomically to both stores
    ///
    /// On any failure after the commit record the partial state is
    /// compensated, so the unified-identity invariant holds on return.
    pub fn add_document(
        &self,
        doc: &Document,
        collection: Option<&str>,
        ctx: &OpContext,
    ) -> Result<String> {
        self.ensure_open()?;
        if doc.id.trim().is_empty() {
            return Err(EngramError::invalid("document id cannot be empty"));
        }
        if doc.text.trim().is_empty() {
            return Err(EngramError::invalid("document text cannot be empty"));
        }

        let collection = self.resolve_collection(collection)?;
        ctx.check()?;

        let vector = self.embed_with_retry(&doc.text, collection.dimension())?;
        let ns_id = collection.namespace_id(&doc.id);
        ctx.check()?;

        let _writer = collection.writer_lock()?;

        // Duplicate check before the commit point so a conflict never
        // leaves a journal record behind
        if collection.vector_read()?.contains(&ns_id)
            || collection.graph().contains_node(&ns_id).map_err(EngramError::from)?
        {
            return Err(EngramError::Conflict(format!("duplicate id: {ns_id}")));
        }

        let mut metadata = ItemMetadata::new(doc.text.clone(), collection.name());
        metadata.title = doc.title.clone();
        metadata.source = doc.source.clone();
        metadata.category = doc.category.clone();
        metadata.tags = doc.tags.clone();
        metadata.extra = doc.extra.clone();

        let mut node_properties = Properties::new();
        if let Some(title) = &doc.title {
            node_properties.insert("title".into(), serde_json::Value::String(title.clone()));
        }
        if let Some(source) = &doc.source {
            node_properties.insert("source".into(), serde_json::Value::String(source.clone()));
        }
        node_properties.insert(
            "collection".into(),
            serde_json::Value::String(collection.name().to_string()),
        );

        let txn = Uuid::new_v4().to_string();
        // Commit point: once this record is durable the transaction will
        // be completed by recovery even across a crash. Cancellation is
        // ignored from here on.
        collection.journal().append(&JournalRecord::AddDocument {
            txn: txn.clone(),
            ns_id: ns_id.clone(),
            vector: vector.clone(),
            metadata: metadata.clone(),
            node_properties: node_properties.clone(),
        })?;

        let record = VectorRecord::new(&ns_id, vector, metadata);
        let vector_applied = {
            let mut store = collection.vector_write()?;
            store.insert(record)
        };
        if let Err(e) = vector_applied {
            self.compensate(&collection, &txn, &ns_id, false);
            return Err(e.into());
        }

        if let Err(e) = collection
            .graph()
            .upsert_node(&ns_id, NODE_DOCUMENT, &node_properties)
        {
            self.compensate(&collection, &txn, &ns_id, true);
            return Err(EngramError::from(e));
        }

        tracing::debug!(id = %ns_id, "document added");
        Ok(ns_id)
    }

    /// Undo both sides of a failed transaction and append the abort record
    fn compensate(&self, collection: &Collection, txn: &str, ns_id: &str, vector_applied: bool) {
        tracing::warn!(id = %ns_id, "rolling back failed transaction");
        if vector_applied {
            if let Ok(mut store) = collection.vector_write() {
                let _ = store.delete(ns_id);
            }
        }
        let _ = collection.graph().delete_node(ns_id);
        if let Err(e) = collection
            .journal()
            .append(&JournalRecord::Abort { txn: txn.to_string() })
        {
            tracing::warn!(error = %e, "abort record not durable; recovery will redo");
        }
    }

    /// Batched add; each document is its own atomic unit
    pub fn add_documents(
        &self,
        docs: &[Document],
        collection: Option<&str>,
        ctx: &OpContext,
    ) -> Result<Vec<BatchOutcome>> {
        self.ensure_open()?;
        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            ctx.check()?;
            outcomes.push(BatchOutcome {
                doc_id: doc.id.clone(),
                outcome: self.add_document(doc, collection, ctx),
            });
        }
        Ok(outcomes)
    }

    /// Delete a document atomically from both stores
    pub fn delete_document(
        &self,
        id: &str,
        collection: Option<&str>,
        ctx: &OpContext,
    ) -> Result<()> {
        self.ensure_open()?;
        let collection = self.resolve_collection(collection)?;
        let ns_id = collection.namespace_id(id);
        ctx.check()?;

        let _writer = collection.writer_lock()?;

        let in_vector = collection.vector_read()?.contains(&ns_id);
        let in_graph = collection
            .graph()
            .contains_node(&ns_id)
            .map_err(EngramError::from)?;
        if !in_vector && !in_graph {
            return Err(EngramError::not_found("document", ns_id));
        }

        let txn = Uuid::new_v4().to_string();
        collection.journal().append(&JournalRecord::DeleteDocument {
            txn,
            ns_id: ns_id.clone(),
        })?;

        // Lock order (vector, graph); removal is idempotent so a redo
        // after a crash converges on both-absent
        {
            let mut store = collection.vector_write()?;
            store.delete(&ns_id).map_err(EngramError::from)?;
            collection.graph().delete_node(&ns_id).map_err(EngramError::from)?;
        }

        tracing::debug!(id = %ns_id, "document deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Hybrid search: route, embed, fan out, fuse, rerank, truncate
    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
        ctx: &OpContext,
    ) -> Result<SearchResponse> {
        self.ensure_open()?;
        if query.trim().is_empty() {
            return Err(EngramError::invalid("query cannot be empty"));
        }

        let route = match &options.plan {
            Some(plan) => RouteDecision {
                intent: crate::router::QueryIntent::Hybrid,
                confidence: 1.0,
                complexity: 0.0,
                plan: plan.clone(),
                rationale: "caller-pinned plan".into(),
            },
            None => self.router.classify(query),
        };

        let k = options.k.unwrap_or(route.plan.k);
        if k == 0 {
            return Ok(SearchResponse {
                results: vec![],
                partial: false,
                route,
            });
        }

        let rerank = options.rerank.unwrap_or(route.plan.rerank);
        let depth = options.graph_depth.unwrap_or(route.plan.graph_depth);
        let expand = depth > 0
            && options
                .include_related
                .unwrap_or(route.plan.graph_depth > 0);
        let alpha = options
            .vector_weight
            .unwrap_or(self.config.search.rerank_alpha)
            .clamp(0.0, 1.0);
        let oversample = if rerank {
            self.config.search.rerank_oversample
        } else {
            self.config.search.oversample
        };

        let collections: Vec<Arc<Collection>> = match &options.collections {
            Some(names) => names
                .iter()
                .map(|name| self.registry.expect(name))
                .collect::<Result<_>>()?,
            None => vec![self.resolve_collection(None)?],
        };
        if collections.is_empty() {
            return Ok(SearchResponse {
                results: vec![],
                partial: false,
                route,
            });
        }

        // Per-collection vector legs
        let mut legs: Vec<(Arc<Collection>, Vec<VectorHit>)> = Vec::new();
        for collection in &collections {
            ctx.check()?;
            let embedding = self.embed_query(query, collection.dimension())?;
            let fetch = k.saturating_mul(oversample.max(1));

            let hits = {
                let store = collection.vector_read()?;
                match store.search(&embedding, fetch, options.filters.as_ref()) {
                    Ok(hits) => hits,
                    // One bounded retry on the failing side
                    Err(first) => {
                        tracing::warn!(error = %first, "vector search failed, retrying once");
                        store
                            .search(&embedding, fetch, options.filters.as_ref())
                            .map_err(|e| EngramError::RetrievalFailed(e.to_string()))?
                    }
                }
            };
            legs.push((Arc::clone(collection), hits));
        }

        // Fusion: reciprocal rank across collections when fanning out
        let multi = legs.len() > 1;
        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        for (collection, hits) in &legs {
            for (rank, hit) in hits.iter().enumerate() {
                let entry = candidates
                    .entry(hit.id.clone())
                    .or_insert_with(|| Candidate::new(hit, collection));
                entry.fused += 1.0 / (RRF_K + rank as f32 + 1.0);
                entry.vector_score = entry.vector_score.max(hit.score);
            }
        }

        // Graph expansion
        let mut partial = false;
        if expand {
            let cap = self.config.search.max_related_per_candidate;
            let budget = self.config.graph.max_traversal_nodes;
            for candidate in candidates.values_mut() {
                ctx.check()?;
                let graph = candidate.collection.graph();
                let related =
                    match graph.neighbours(&candidate.id, None, Direction::Outgoing, depth, budget)
                    {
                        Ok(related) => Ok(related),
                        Err(first) => {
                            tracing::warn!(error = %first, "graph expansion failed, retrying once");
                            graph.neighbours(
                                &candidate.id,
                                None,
                                Direction::Outgoing,
                                depth,
                                budget,
                            )
                        }
                    };
                match related {
                    Ok(related) => {
                        candidate.related = related
                            .into_iter()
                            .take(cap)
                            .map(|n| RelatedNode {
                                id: n.node.id,
                                node_type: n.node.node_type,
                                depth: n.depth,
                            })
                            .collect();
                    }
                    Err(e) => {
                        if !options.allow_partial {
                            return Err(EngramError::RetrievalFailed(format!(
                                "graph expansion failed for {}: {e}",
                                candidate.id
                            )));
                        }
                        partial = true;
                    }
                }
            }
        }

        // Graph score from neighbourhood counting
        let max_expected = self.config.search.max_expected_neighbours.max(1) as f32;
        for candidate in candidates.values_mut() {
            candidate.graph_score = (candidate.related.len() as f32 / max_expected).min(1.0);
        }

        // Reranking always flows through the capability trait; the null
        // implementation keeps scores untouched. Candidates are grouped by
        // their collection's dimension so the query embedding matches the
        // neighbour vectors of every group, mirroring the per-leg embedding.
        if rerank && expand {
            let mut groups: HashMap<usize, Vec<RerankCandidate>> = HashMap::new();
            for candidate in candidates.values() {
                let input = RerankCandidate {
                    id: candidate.id.clone(),
                    text: candidate.metadata.text.clone(),
                    vector_score: candidate.vector_score,
                    graph_score: candidate.graph_score,
                    neighbor_vectors: candidate
                        .related
                        .iter()
                        .filter_map(|n| {
                            candidate
                                .collection
                                .vector_read()
                                .ok()
                                .and_then(|store| store.vector_of(&n.id))
                        })
                        .collect(),
                };
                groups
                    .entry(candidate.collection.dimension())
                    .or_default()
                    .push(input);
            }
            for (dimension, group) in groups {
                let query_embedding = self.embed_query(query, dimension)?;
                for outcome in self.reranker.rerank(&query_embedding, &group) {
                    if let Some(candidate) = candidates.get_mut(&outcome.id) {
                        candidate.graph_score = outcome.graph_score.clamp(0.0, 1.0);
                    }
                }
            }
        }

        // Combine. Without graph participation the vector side stands
        // alone rather than being diluted by a zero graph term.
        let max_fused = candidates
            .values()
            .map(|c| c.fused)
            .fold(0.0_f32, f32::max)
            .max(f32::EPSILON);
        let mut results: Vec<Candidate> = candidates.into_values().collect();
        for candidate in &mut results {
            let vector_component = if multi {
                candidate.fused / max_fused
            } else {
                candidate.vector_score
            };
            candidate.combined = if expand {
                alpha * vector_component + (1.0 - alpha) * candidate.graph_score
            } else {
                vector_component
            }
            .clamp(0.0, 1.0);
        }

        results.sort_by(|a, b| {
            b.combined
                .partial_cmp(&a.combined)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.graph_score
                        .partial_cmp(&a.graph_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.access_count.cmp(&a.access_count))
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(k);

        // Access counts are eventually consistent: noted here, applied by
        // the compaction pass
        for candidate in &results {
            candidate.collection.note_access(&candidate.id);
        }

        let results = results
            .into_iter()
            .map(|candidate| UnifiedResult {
                id: candidate.id,
                title: candidate.metadata.title.clone(),
                text: candidate.metadata.text.clone(),
                source: candidate.metadata.source.clone(),
                vector_score: candidate.vector_score,
                graph_score: candidate.graph_score,
                combined_score: candidate.combined,
                related_nodes: expand.then_some(candidate.related),
                metadata: candidate.metadata,
            })
            .collect();

        Ok(SearchResponse {
            results,
            partial,
            route,
        })
    }

    // ------------------------------------------------------------------
    // Graph surface
    // ------------------------------------------------------------------

    /// Create a relationship between two existing documents
    ///
    /// Both endpoints must live in the same collection (edges never span
    /// collection graphs).
    pub fn add_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: &str,
        properties: Option<Properties>,
    ) -> Result<()> {
        self.ensure_open()?;
        if edge_type.trim().is_empty() {
            return Err(EngramError::invalid("edge type cannot be empty"));
        }
        let collection = self.collection_of(from_id)?;
        let _writer = collection.writer_lock()?;
        collection
            .graph()
            .upsert_edge(from_id, to_id, edge_type, &properties.unwrap_or_default())
            .map_err(EngramError::from)
    }

    /// Documents reachable from `id` through the graph
    pub fn find_related(
        &self,
        id: &str,
        depth: Option<usize>,
        types: Option<&[String]>,
    ) -> Result<Vec<UnifiedResult>> {
        self.ensure_open()?;
        let collection = self.collection_of(id)?;
        let depth = depth.unwrap_or(1);
        if depth == 0 {
            return Ok(vec![]);
        }

        let neighbours = collection
            .graph()
            .neighbours(
                id,
                types,
                Direction::Both,
                depth,
                self.config.graph.max_traversal_nodes,
            )
            .map_err(EngramError::from)?;

        let store = collection.vector_read()?;
        let results = neighbours
            .into_iter()
            .filter(|n| n.node.node_type == NODE_DOCUMENT)
            .filter_map(|n| {
                let record = store.get(&n.node.id)?;
                let graph_score = 1.0 / n.depth as f32;
                Some(UnifiedResult {
                    id: record.id.clone(),
                    title: record.metadata.title.clone(),
                    text: record.metadata.text.clone(),
                    source: record.metadata.source.clone(),
                    vector_score: 0.0,
                    graph_score,
                    combined_score: graph_score,
                    related_nodes: None,
                    metadata: record.metadata.clone(),
                })
            })
            .collect();
        Ok(results)
    }

    /// Run a Cypher-subset query across every collection's graph
    pub fn graph_query(&self, query: &str) -> Result<GraphQueryResult> {
        self.ensure_open()?;
        let parsed = cypher::parse(query).map_err(EngramError::from)?;

        let mut merged = GraphQueryResult::default();
        for collection in self.registry.handles()? {
            let part = cypher::execute(
                collection.graph(),
                &parsed,
                self.config.graph.max_traversal_nodes,
            )
            .map_err(EngramError::from)?;
            for node in part.nodes {
                if !merged.nodes.iter().any(|n| n.id == node.id) {
                    merged.nodes.push(node);
                }
            }
            for edge in part.edges {
                if !merged.edges.iter().any(|e| {
                    e.from == edge.from && e.to == edge.to && e.edge_type == edge.edge_type
                }) {
                    merged.edges.push(edge);
                }
            }
        }
        Ok(merged)
    }

    fn collection_of(&self, ns_id: &str) -> Result<Arc<Collection>> {
        let (name, _) = ns_id
            .split_once(':')
            .ok_or_else(|| EngramError::invalid(format!("id '{ns_id}' is not namespaced")))?;
        self.registry.expect(name)
    }

    // ------------------------------------------------------------------
    // Cognitive surface
    // ------------------------------------------------------------------

    /// Start a learning trajectory
    pub fn begin_trajectory(&self, query: &str, route: Option<&str>) -> Result<String> {
        self.ensure_open()?;
        self.cognitive.begin_trajectory(query, route)
    }

    /// Append a step to a trajectory
    ///
    /// The step embedding (used only for clustering) is best-effort: a
    /// backend failure records the step without one.
    pub fn record_step(&self, trajectory_id: &str, text: &str, reward: f32) -> Result<()> {
        self.ensure_open()?;
        let embedding = self
            .embedder
            .embed_one(text, self.config.default_dimension)
            .map_err(|e| tracing::debug!(error = %e, "step embedding skipped"))
            .ok();
        self.cognitive
            .record_step(trajectory_id, text, reward, embedding.as_deref())
    }

    /// Seal a trajectory with its quality
    pub fn end_trajectory(&self, trajectory_id: &str, quality: f32) -> Result<()> {
        self.ensure_open()?;
        self.cognitive.end_trajectory(trajectory_id, quality)
    }

    /// Fetch a trajectory with its steps
    pub fn trajectory(&self, trajectory_id: &str) -> Result<Option<Trajectory>> {
        self.ensure_open()?;
        self.cognitive.trajectory(trajectory_id)
    }

    /// Nearest reasoning patterns to a query
    pub fn find_patterns(&self, query: &str, k: usize) -> Result<Vec<ReasoningPattern>> {
        self.ensure_open()?;
        if k == 0 {
            return Ok(vec![]);
        }
        let embedding = self.embed_query(query, self.config.default_dimension)?;
        self.cognitive.find_patterns(&embedding, k)
    }

    // ------------------------------------------------------------------
    // Stats, background work, shutdown
    // ------------------------------------------------------------------

    /// Composite statistics across all subsystems
    pub fn get_stats(&self) -> Result<CompositeStats> {
        self.ensure_open()?;
        let mut vector = HashMap::new();
        let mut graph = HashMap::new();
        for collection in self.registry.handles()? {
            vector.insert(collection.name().to_string(), collection.vector_read()?.stats());
            graph.insert(
                collection.name().to_string(),
                collection.graph().stats().map_err(EngramError::from)?,
            );
        }
        Ok(CompositeStats {
            collections: self.registry.list()?,
            vector,
            graph,
            cognitive: self.cognitive.stats()?,
        })
    }

    /// One background pass: access draining, tier reclassification,
    /// trajectory clustering, compaction
    ///
    /// Idempotent; safe to call from a timer or by hand. Write locks are
    /// held per sub-step, never across the whole pass.
    pub fn tick(&self) -> Result<TickReport> {
        self.ensure_open()?;
        let mut report = TickReport::default();
        let now = chrono::Utc::now();

        for collection in self.registry.handles()? {
            report.collections += 1;
            report.accesses_applied += collection.drain_access()?;
            {
                let mut store = collection.vector_write()?;
                report.tiers_moved += store.reclassify_tiers(&self.config.tiering, now);
            }
            collection.flush()?;
            collection.graph().optimize().map_err(EngramError::from)?;
        }

        report.patterns = self.cognitive.discover_patterns()?;
        tracing::debug!(?report, "maintenance pass");
        Ok(report)
    }

    /// Orderly shutdown: flush every collection and refuse further work
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for collection in self.registry.handles()? {
            collection.flush()?;
        }
        tracing::info!("engine closed");
        Ok(())
    }
}

impl Drop for UnifiedMemory {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "close on drop failed");
            }
        }
    }
}

/// Accumulator for one search candidate
struct Candidate {
    id: String,
    collection: Arc<Collection>,
    metadata: ItemMetadata,
    vector_score: f32,
    fused: f32,
    graph_score: f32,
    combined: f32,
    related: Vec<RelatedNode>,
    access_count: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl Candidate {
    fn new(hit: &VectorHit, collection: &Arc<Collection>) -> Self {
        Self {
            id: hit.id.clone(),
            collection: Arc::clone(collection),
            metadata: hit.metadata.clone(),
            vector_score: 0.0,
            fused: 0.0,
            graph_score: 0.0,
            combined: 0.0,
            related: Vec::new(),
            access_count: hit.access_count,
            timestamp: hit.timestamp,
        }
    }
}
