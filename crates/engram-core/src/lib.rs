//! # Engram Core
//!
//! A local-first cognitive knowledge graph engine: a tiered HNSW vector
//! index and a typed property graph behind one atomic facade, with a
//! semantic router shaping query execution and a trajectory-learning layer
//! on top.
//!
//! - **Unified memory**: document add/delete fan out to both stores under a
//!   journaled transaction; either both sides commit or neither survives a
//!   crash
//! - **Hybrid search**: routed by intent, oversampled vector retrieval,
//!   optional graph expansion, reciprocal-rank fusion across collections,
//!   graph-aware reranking
//! - **Property graph**: Cypher-subset queries, bounded traversals, hash
//!   indexes on `(type, id)` and edge endpoints
//! - **Tiered index**: Hot/Warm/Cold classification by access recency,
//!   driven by an idempotent background pass
//! - **Cognitive layer**: learning trajectories with rewards, k-means
//!   pattern discovery, soft-attention reranking - all optional, all
//!   neutral when disabled
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use engram_core::{Document, EngineConfig, OpContext, SearchOptions, UnifiedMemory};
//!
//! # fn main() -> engram_core::Result<()> {
//! let memory = UnifiedMemory::open("./data", EngineConfig::default())?;
//!
//! let doc = Document::new("note-1", "HNSW gives sub-millisecond ANN search")
//!     .with_title("Vector indexes");
//! let id = memory.add_document(&doc, None, &OpContext::none())?;
//!
//! let response = memory.search(
//!     "how fast is approximate nearest neighbour search",
//!     &SearchOptions::default(),
//!     &OpContext::none(),
//! )?;
//! assert_eq!(response.results[0].id, id);
//!
//! memory.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): compile SQLite into the binary
//! - `embeddings`: local ONNX embedding provider via fastembed
//! - `remote-embeddings`: Ollama-compatible HTTP embedding provider

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod cognitive;
pub mod collection;
pub mod config;
pub mod ctx;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod journal;
pub mod maintenance;
pub mod registry;
pub mod router;
pub mod unified;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{EngramError, Result};

pub use config::{
    CognitiveConfig, EngineConfig, GraphConfig, HnswConfig, MAX_DIMENSION, MIN_DIMENSION, Metric,
    RouterConfig, SearchConfig, TieringConfig,
};

pub use ctx::{CancelToken, OpContext};

pub use unified::{
    BatchOutcome, CompositeStats, Document, RelatedNode, SearchOptions, SearchResponse,
    TickReport, UnifiedMemory, UnifiedResult,
};

pub use collection::{CollectionInfo, MANIFEST_VERSION, Manifest};

pub use registry::{DEFAULT_COLLECTION, MigrationReport};

pub use vector::{
    ItemMetadata, MetadataFilter, Tier, VectorHit, VectorRecord, VectorStore, VectorStoreStats,
};

pub use graph::{
    Direction, GraphCounts, GraphEdge, GraphNode, GraphQueryResult, GraphStore, Neighbour,
    Properties,
};

pub use router::{ExecutionPlan, IntentClassifier, KeywordClassifier, QueryIntent, RouteDecision};

pub use cognitive::{
    CognitiveStats, Feedback, GraphAttentionReranker, NoopReranker, ReasoningPattern,
    RerankCandidate, RerankOutcome, Reranker, Trajectory, TrajectoryStatus, TrajectoryStep,
    reward_for_feedback,
};

pub use embeddings::{
    EmbeddingError, EmbeddingProvider, HashingEmbedder, cosine_similarity, dot_product,
    euclidean_distance,
};

#[cfg(feature = "embeddings")]
pub use embeddings::FastembedProvider;

#[cfg(feature = "remote-embeddings")]
pub use embeddings::{RemoteEmbedder, RemoteEmbedderConfig};

pub use ingest::{
    Chunk, ChunkConfig, Citation, CitationKind, DocFormat, IngestPipeline, IngestReport,
    IngestStage, NoopObserver, ParsedDocument, ProgressObserver,
};

pub use maintenance::MaintenanceWorker;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Document, EngineConfig, EngramError, Metric, OpContext, Result, SearchOptions,
        SearchResponse, UnifiedMemory, UnifiedResult,
    };

    pub use crate::{
        CancelToken, CollectionInfo, IngestPipeline, MaintenanceWorker, MetadataFilter,
        ParsedDocument, QueryIntent, Tier,
    };
}
