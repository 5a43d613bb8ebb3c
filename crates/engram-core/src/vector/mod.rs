//! Tiered vector index
//!
//! HNSW (via usearch) with a metadata table beside it:
//! - metric-aware scoring normalised to [0, 1]
//! - metadata-predicate filtering over an over-sampled candidate pool
//! - access-recency tiering (Hot / Warm / Cold / Untiered)
//! - persistence to `vectors.idx` with a JSON metadata sidecar

mod filter;
mod store;

pub use filter::MetadataFilter;
pub use store::{VectorStore, VectorStoreStats};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngramError;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector store error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorError {
    /// An item with this id already exists
    DuplicateId(String),
    /// Vector length does not match the collection dimension
    DimensionMismatch {
        /// Collection dimension
        expected: usize,
        /// Length of the offending vector
        got: usize,
    },
    /// The underlying index failed
    Index(String),
    /// Failed to persist or load the index
    Persistence(String),
}

impl std::fmt::Display for VectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorError::DuplicateId(id) => write!(f, "duplicate id: {}", id),
            VectorError::DimensionMismatch { expected, got } => {
                write!(f, "dimension mismatch: expected {}, got {}", expected, got)
            }
            VectorError::Index(e) => write!(f, "index error: {}", e),
            VectorError::Persistence(e) => write!(f, "persistence error: {}", e),
        }
    }
}

impl std::error::Error for VectorError {}

impl From<VectorError> for EngramError {
    fn from(e: VectorError) -> Self {
        match e {
            VectorError::DuplicateId(id) => EngramError::Conflict(format!("duplicate id: {id}")),
            VectorError::DimensionMismatch { .. } => EngramError::InvalidInput(e.to_string()),
            VectorError::Index(msg) | VectorError::Persistence(msg) => {
                EngramError::StorageFailure(msg)
            }
        }
    }
}

// ============================================================================
// TIERS
// ============================================================================

/// Advisory access-recency classification of a vector item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Frequently accessed within the hot window
    Hot,
    /// Accessed within the warm window
    Warm,
    /// Not accessed beyond the warm window
    Cold,
    /// Newly inserted, awaiting the first classification pass
    #[default]
    Untiered,
}

impl Tier {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
            Tier::Untiered => "untiered",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ITEM TYPES
// ============================================================================

/// Metadata carried by every vector item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    /// Full chunk content
    pub text: String,
    /// Display title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Origin (URL, filename, conversation, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Free-form category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Tag set (duplicates are collapsed on construction)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Owning collection name
    pub collection: String,
    /// Open extension map
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ItemMetadata {
    /// Minimal metadata for a chunk of text in a collection
    pub fn new(text: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            title: None,
            source: None,
            category: None,
            tags: Vec::new(),
            timestamp: Utc::now(),
            collection: collection.into(),
            extra: HashMap::new(),
        }
    }

    /// Apply a shallow JSON patch
    ///
    /// Known keys update the corresponding field; unknown keys land in the
    /// extension map. A `null` value clears optional fields and extension
    /// entries. Returns the set of keys that changed.
    pub fn apply_patch(&mut self, patch: &serde_json::Map<String, serde_json::Value>) -> usize {
        let mut changed = 0;
        for (key, value) in patch {
            changed += 1;
            match key.as_str() {
                "text" => {
                    if let Some(s) = value.as_str() {
                        self.text = s.to_string();
                    }
                }
                "title" => self.title = value.as_str().map(str::to_string),
                "source" => self.source = value.as_str().map(str::to_string),
                "category" => self.category = value.as_str().map(str::to_string),
                "tags" => {
                    if let Some(array) = value.as_array() {
                        let mut tags: Vec<String> = array
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect();
                        tags.sort();
                        tags.dedup();
                        self.tags = tags;
                    }
                }
                "timestamp" => {
                    if let Some(ts) = value
                        .as_str()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    {
                        self.timestamp = ts.with_timezone(&Utc);
                    }
                }
                _ => {
                    if value.is_null() {
                        self.extra.remove(key);
                    } else {
                        self.extra.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        changed
    }
}

/// A vector item: id, embedding, metadata, and access bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    /// Globally unique id, prefixed with `"<collection>:"`
    pub id: String,
    /// The embedding (length equals the collection dimension)
    pub vector: Vec<f32>,
    /// Carried metadata
    pub metadata: ItemMetadata,
    /// Current tier
    #[serde(default)]
    pub tier: Tier,
    /// Insertion time
    pub created_at: DateTime<Utc>,
    /// Last successful retrieval
    pub last_accessed: DateTime<Utc>,
    /// Monotonically non-decreasing retrieval counter
    #[serde(default)]
    pub access_count: u64,
}

impl VectorRecord {
    /// Build a fresh, untiered record
    pub fn new(id: impl Into<String>, vector: Vec<f32>, metadata: ItemMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            vector,
            metadata,
            tier: Tier::Untiered,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }
}

/// One search result from the vector store
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// Item id
    pub id: String,
    /// Normalised similarity score in [0, 1]
    pub score: f32,
    /// Cloned item metadata
    pub metadata: ItemMetadata,
    /// Tier at retrieval time
    pub tier: Tier,
    /// Access count at retrieval time (tie-break input)
    pub access_count: u64,
    /// Item timestamp (tie-break input)
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_default_is_untiered() {
        assert_eq!(Tier::default(), Tier::Untiered);
    }

    #[test]
    fn test_apply_patch_known_and_extra_keys() {
        let mut metadata = ItemMetadata::new("body", "kb");
        let patch: serde_json::Map<String, serde_json::Value> = serde_json::from_value(
            serde_json::json!({
                "title": "A title",
                "tags": ["b", "a", "b"],
                "priority": 3
            }),
        )
        .unwrap();

        metadata.apply_patch(&patch);
        assert_eq!(metadata.title.as_deref(), Some("A title"));
        assert_eq!(metadata.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(metadata.extra["priority"], serde_json::json!(3));
    }

    #[test]
    fn test_apply_patch_null_clears() {
        let mut metadata = ItemMetadata::new("body", "kb");
        metadata.title = Some("old".into());
        metadata
            .extra
            .insert("stale".into(), serde_json::json!(true));

        let patch: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({ "title": null, "stale": null })).unwrap();
        metadata.apply_patch(&patch);

        assert!(metadata.title.is_none());
        assert!(!metadata.extra.contains_key("stale"));
    }
}
