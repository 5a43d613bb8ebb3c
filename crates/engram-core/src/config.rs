//! Engine configuration
//!
//! All tunables live behind `EngineConfig`; nothing is read from ambient
//! global state. A `UnifiedMemory` handle owns one config, so a process can
//! host several engines with different settings and storage roots.

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Smallest accepted collection dimension
pub const MIN_DIMENSION: usize = 64;

/// Largest accepted collection dimension
pub const MAX_DIMENSION: usize = 4096;

/// HNSW connectivity parameter (M)
pub const DEFAULT_HNSW_M: usize = 16;

/// HNSW expansion factor for index building
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// HNSW expansion factor for search
pub const DEFAULT_EF_SEARCH: usize = 64;

/// RRF dampening constant used when fusing ranked lists
pub const RRF_K: f32 = 60.0;

// ============================================================================
// DISTANCE METRIC
// ============================================================================

/// Distance metric of a collection, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity (higher is better)
    #[default]
    Cosine,
    /// Euclidean distance (mapped to a similarity via 1 / (1 + d))
    Euclidean,
    /// Inner product (higher is better)
    Dot,
}

impl Metric {
    /// Stable string form used in manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dot => "dot",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" | "cos" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "dot" | "ip" => Ok(Metric::Dot),
            other => Err(EngramError::invalid(format!("unknown metric: {other}"))),
        }
    }
}

// ============================================================================
// COMPONENT CONFIGS
// ============================================================================

/// HNSW index parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Connectivity (M): neighbors kept per node
    pub m: usize,
    /// Expansion factor while building
    pub ef_construction: usize,
    /// Expansion factor while searching
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: DEFAULT_HNSW_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
        }
    }
}

/// Access-recency tiering policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieringConfig {
    /// Window (days) within which frequent access means Hot
    pub w_hot_days: i64,
    /// Window (days) within which any access means Warm
    pub w_warm_days: i64,
    /// Access count at or above which an item is Hot
    pub theta_hot: u64,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            w_hot_days: 7,
            w_warm_days: 30,
            theta_hot: 5,
        }
    }
}

/// Search and fusion tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidate oversampling factor (k' = k * oversample)
    pub oversample: usize,
    /// Oversampling factor when reranking is on
    pub rerank_oversample: usize,
    /// Weight of the vector score in the combined score (alpha)
    pub rerank_alpha: f32,
    /// Neighbour count at which graphScore saturates to 1.0
    pub max_expected_neighbours: usize,
    /// Cap on related nodes collected per candidate during expansion
    pub max_related_per_candidate: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            oversample: 2,
            rerank_oversample: 3,
            rerank_alpha: 0.7,
            max_expected_neighbours: 8,
            max_related_per_candidate: 8,
        }
    }
}

/// Semantic router tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Below this classification confidence the router falls back to Hybrid
    pub intent_threshold: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            intent_threshold: 0.35,
        }
    }
}

/// Graph store tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Ceiling on nodes visited by a single traversal
    pub max_traversal_nodes: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_traversal_nodes: 10_000,
        }
    }
}

/// Cognitive engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveConfig {
    /// Master switch; when false, trajectory calls become no-ops that still
    /// validate input, and reranking is neutral
    pub enabled: bool,
    /// Minimum completed trajectories per discovered pattern
    pub pattern_min_cluster: usize,
}

impl Default for CognitiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pattern_min_cluster: 3,
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Dimension used when the `default` collection is auto-created
    pub default_dimension: usize,
    /// Metric used when the `default` collection is auto-created
    pub default_metric: Metric,
    /// HNSW parameters for new collections
    pub hnsw: HnswConfig,
    /// Tier classification policy
    pub tiering: TieringConfig,
    /// Search and fusion tunables
    pub search: SearchConfig,
    /// Router tunables
    pub router: RouterConfig,
    /// Graph traversal bounds
    pub graph: GraphConfig,
    /// Cognitive engine switches
    pub cognitive: CognitiveConfig,
    /// Maximum texts per embedding batch
    pub embed_batch_size: usize,
    /// Bounded retries for transient embedding failures
    pub embed_max_retries: usize,
    /// Base backoff between embedding retries, in milliseconds
    pub embed_retry_base_ms: u64,
    /// Capacity of the query-embedding LRU cache
    pub query_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_dimension: 384,
            default_metric: Metric::Cosine,
            hnsw: HnswConfig::default(),
            tiering: TieringConfig::default(),
            search: SearchConfig::default(),
            router: RouterConfig::default(),
            graph: GraphConfig::default(),
            cognitive: CognitiveConfig::default(),
            embed_batch_size: 32,
            embed_max_retries: 3,
            embed_retry_base_ms: 100,
            query_cache_size: 100,
        }
    }
}

impl EngineConfig {
    /// Reject out-of-range settings before the engine opens any store
    pub fn validate(&self) -> Result<()> {
        validate_dimension(self.default_dimension)?;
        if self.hnsw.m == 0 || self.hnsw.ef_construction == 0 || self.hnsw.ef_search == 0 {
            return Err(EngramError::invalid("hnsw parameters must be positive"));
        }
        if self.tiering.w_hot_days <= 0
            || self.tiering.w_warm_days <= 0
            || self.tiering.theta_hot == 0
        {
            return Err(EngramError::invalid("tiering parameters must be positive"));
        }
        if self.search.oversample < 1 || self.search.rerank_oversample < 1 {
            return Err(EngramError::invalid("search.oversample must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.search.rerank_alpha) {
            return Err(EngramError::invalid("search.rerank_alpha must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.router.intent_threshold) {
            return Err(EngramError::invalid(
                "router.intent_threshold must be in [0, 1]",
            ));
        }
        if self.graph.max_traversal_nodes == 0 {
            return Err(EngramError::invalid(
                "graph.max_traversal_nodes must be positive",
            ));
        }
        if self.cognitive.pattern_min_cluster == 0 {
            return Err(EngramError::invalid(
                "cognitive.pattern_min_cluster must be positive",
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(EngramError::invalid("embed_batch_size must be positive"));
        }
        Ok(())
    }
}

/// Check a collection dimension against the accepted range
pub fn validate_dimension(dimension: usize) -> Result<()> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&dimension) {
        return Err(EngramError::invalid(format!(
            "dimension {dimension} outside [{MIN_DIMENSION}, {MAX_DIMENSION}]"
        )));
    }
    Ok(())
}
