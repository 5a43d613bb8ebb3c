//! HNSW vector store
//!
//! Wraps a usearch index with the metadata table, tier bookkeeping, and
//! filtered search. String ids are mapped to dense u64 keys for the index;
//! the metadata table is the source of truth for everything but geometry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::config::{HnswConfig, Metric, TieringConfig};

use super::{MetadataFilter, Tier, VectorError, VectorHit, VectorRecord};

/// Hard ceiling on the candidate pool during filtered search, as a multiple of k
const MAX_OVERSAMPLE: usize = 8;

/// Sidecar file suffix holding metadata and id mappings
const SIDECAR_SUFFIX: &str = "meta.json";

// ============================================================================
// STATS
// ============================================================================

/// Vector store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStoreStats {
    /// Total items
    pub total: usize,
    /// Items per tier
    pub hot: usize,
    /// Items per tier
    pub warm: usize,
    /// Items per tier
    pub cold: usize,
    /// Items per tier
    pub untiered: usize,
    /// Mean insert latency in microseconds
    pub avg_insert_us: u64,
    /// Mean search latency in microseconds
    pub avg_search_us: u64,
    /// Serialized index size in bytes
    pub memory_bytes: usize,
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    dimension: usize,
    metric: Metric,
    next_id: u64,
    key_to_id: HashMap<String, u64>,
    records: Vec<VectorRecord>,
}

// ============================================================================
// VECTOR STORE
// ============================================================================

/// One collection's HNSW index plus metadata table
pub struct VectorStore {
    index: Index,
    dimension: usize,
    metric: Metric,
    hnsw: HnswConfig,
    records: HashMap<String, VectorRecord>,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
    insert_us: AtomicU64,
    insert_count: AtomicU64,
    search_us: AtomicU64,
    search_count: AtomicU64,
}

impl VectorStore {
    /// Create an empty store
    pub fn new(dimension: usize, metric: Metric, hnsw: &HnswConfig) -> Result<Self, VectorError> {
        let index = build_index(dimension, metric, hnsw)?;
        Ok(Self {
            index,
            dimension,
            metric,
            hnsw: hnsw.clone(),
            records: HashMap::new(),
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
            insert_us: AtomicU64::new(0),
            insert_count: AtomicU64::new(0),
            search_us: AtomicU64::new(0),
            search_count: AtomicU64::new(0),
        })
    }

    /// Collection dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Collection metric
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the store holds no items
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when an item with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.records.get(id)
    }

    /// Clone the raw vector of an item
    pub fn vector_of(&self, id: &str) -> Option<Vec<f32>> {
        self.records.get(id).map(|r| r.vector.clone())
    }

    /// Iterate all records
    pub fn records(&self) -> impl Iterator<Item = &VectorRecord> {
        self.records.values()
    }

    /// Insert a new item
    pub fn insert(&mut self, record: VectorRecord) -> Result<(), VectorError> {
        if record.vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: record.vector.len(),
            });
        }
        if self.records.contains_key(&record.id) {
            return Err(VectorError::DuplicateId(record.id));
        }

        let started = Instant::now();

        // usearch requires reserved capacity before add
        let capacity = self.index.capacity();
        if self.index.size() >= capacity {
            let new_capacity = std::cmp::max(capacity * 2, 16);
            self.index
                .reserve(new_capacity)
                .map_err(|e| VectorError::Index(e.to_string()))?;
        }

        let key = self.next_id;
        self.index
            .add(key, &record.vector)
            .map_err(|e| VectorError::Index(e.to_string()))?;
        self.next_id += 1;

        self.key_to_id.insert(record.id.clone(), key);
        self.id_to_key.insert(key, record.id.clone());
        self.records.insert(record.id.clone(), record);

        self.insert_us
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.insert_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Insert a batch, reporting a per-item outcome
    ///
    /// The batch is not all-or-nothing: failed items leave the rest intact.
    pub fn insert_batch(
        &mut self,
        records: Vec<VectorRecord>,
    ) -> Vec<(String, Result<(), VectorError>)> {
        records
            .into_iter()
            .map(|record| {
                let id = record.id.clone();
                let outcome = self.insert(record);
                (id, outcome)
            })
            .collect()
    }

    /// Remove an item; false when absent
    pub fn delete(&mut self, id: &str) -> Result<bool, VectorError> {
        let Some(key) = self.key_to_id.remove(id) else {
            return Ok(false);
        };
        self.id_to_key.remove(&key);
        self.records.remove(id);
        self.index
            .remove(key)
            .map_err(|e| VectorError::Index(e.to_string()))?;
        Ok(true)
    }

    /// Apply a shallow metadata patch; false when the id is absent
    pub fn update_metadata(
        &mut self,
        id: &str,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.metadata.apply_patch(patch);
                true
            }
            None => false,
        }
    }

    /// Record one successful retrieval of an item
    ///
    /// The counter never decreases; last-access moves forward only.
    pub fn record_access(&mut self, id: &str, count: u64) {
        if let Some(record) = self.records.get_mut(id) {
            record.access_count += count;
            record.last_accessed = Utc::now();
        }
    }

    /// Search for the k nearest items, optionally filtered
    ///
    /// With a filter, candidates are drawn from an over-sampled pool
    /// (2·k, doubling up to 8·k) so the filtered result keeps honest
    /// cardinality.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>, VectorError> {
        if query.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        if k == 0 || self.records.is_empty() {
            return Ok(vec![]);
        }

        let started = Instant::now();
        let filtering = filter.map(|f| !f.is_empty()).unwrap_or(false);
        let total = self.records.len();

        let mut fetch = if filtering { k.saturating_mul(2) } else { k };
        fetch = fetch.min(total);

        let mut hits = loop {
            let matches = self
                .index
                .search(query, fetch)
                .map_err(|e| VectorError::Index(e.to_string()))?;

            let mut collected = Vec::with_capacity(matches.keys.len());
            for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
                let Some(id) = self.id_to_key.get(key) else {
                    continue;
                };
                let Some(record) = self.records.get(id) else {
                    continue;
                };
                if let Some(f) = filter {
                    if !f.matches(record) {
                        continue;
                    }
                }
                collected.push(VectorHit {
                    id: record.id.clone(),
                    score: normalize_score(self.metric, *distance),
                    metadata: record.metadata.clone(),
                    tier: record.tier,
                    access_count: record.access_count,
                    timestamp: record.metadata.timestamp,
                });
            }

            let exhausted = fetch >= total || fetch >= k.saturating_mul(MAX_OVERSAMPLE);
            if collected.len() >= k || !filtering || exhausted {
                break collected;
            }
            fetch = (fetch * 2).min(total);
        };

        sort_hits(&mut hits);
        hits.truncate(k);

        self.search_us
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.search_count.fetch_add(1, Ordering::Relaxed);
        Ok(hits)
    }

    /// Reclassify every item's tier against the policy; returns items moved
    pub fn reclassify_tiers(&mut self, policy: &TieringConfig, now: DateTime<Utc>) -> usize {
        let hot_cutoff = now - Duration::days(policy.w_hot_days);
        let warm_cutoff = now - Duration::days(policy.w_warm_days);
        let mut moved = 0;

        for record in self.records.values_mut() {
            let next = if record.last_accessed >= hot_cutoff
                && record.access_count >= policy.theta_hot
            {
                Tier::Hot
            } else if record.last_accessed >= warm_cutoff {
                Tier::Warm
            } else {
                Tier::Cold
            };
            if record.tier != next {
                record.tier = next;
                moved += 1;
            }
        }
        moved
    }

    /// Store statistics
    pub fn stats(&self) -> VectorStoreStats {
        let mut per_tier = [0usize; 4];
        for record in self.records.values() {
            let slot = match record.tier {
                Tier::Hot => 0,
                Tier::Warm => 1,
                Tier::Cold => 2,
                Tier::Untiered => 3,
            };
            per_tier[slot] += 1;
        }

        let inserts = self.insert_count.load(Ordering::Relaxed);
        let searches = self.search_count.load(Ordering::Relaxed);
        VectorStoreStats {
            total: self.records.len(),
            hot: per_tier[0],
            warm: per_tier[1],
            cold: per_tier[2],
            untiered: per_tier[3],
            avg_insert_us: if inserts > 0 {
                self.insert_us.load(Ordering::Relaxed) / inserts
            } else {
                0
            },
            avg_search_us: if searches > 0 {
                self.search_us.load(Ordering::Relaxed) / searches
            } else {
                0
            },
            memory_bytes: self.index.serialized_length(),
        }
    }

    /// Persist the index and its metadata sidecar
    ///
    /// The sidecar is written atomically (temp file + rename) so a crash
    /// mid-save leaves the previous generation intact.
    pub fn save(&self, path: &Path) -> Result<(), VectorError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| VectorError::Persistence("non-utf8 path".to_string()))?;

        if !self.records.is_empty() {
            self.index
                .save(path_str)
                .map_err(|e| VectorError::Persistence(e.to_string()))?;
        }

        let sidecar = Sidecar {
            dimension: self.dimension,
            metric: self.metric,
            next_id: self.next_id,
            key_to_id: self.key_to_id.clone(),
            records: self.records.values().cloned().collect(),
        };
        let payload = serde_json::to_vec(&sidecar)
            .map_err(|e| VectorError::Persistence(e.to_string()))?;

        let sidecar_path = path.with_extension(SIDECAR_SUFFIX);
        let tmp_path = path.with_extension("meta.json.tmp");
        std::fs::write(&tmp_path, payload).map_err(|e| VectorError::Persistence(e.to_string()))?;
        std::fs::rename(&tmp_path, &sidecar_path)
            .map_err(|e| VectorError::Persistence(e.to_string()))?;
        Ok(())
    }

    /// Load a store persisted by [`VectorStore::save`]
    ///
    /// When the index file is missing or unreadable the graph is rebuilt
    /// from the vectors in the sidecar.
    pub fn load(path: &Path, hnsw: &HnswConfig) -> Result<Self, VectorError> {
        let sidecar_path = path.with_extension(SIDECAR_SUFFIX);
        let payload = std::fs::read(&sidecar_path)
            .map_err(|e| VectorError::Persistence(format!("reading sidecar: {e}")))?;
        let sidecar: Sidecar = serde_json::from_slice(&payload)
            .map_err(|e| VectorError::Persistence(format!("parsing sidecar: {e}")))?;

        let mut store = Self::new(sidecar.dimension, sidecar.metric, hnsw)?;
        store.next_id = sidecar.next_id;
        store.key_to_id = sidecar.key_to_id;
        store.id_to_key = store
            .key_to_id
            .iter()
            .map(|(id, key)| (*key, id.clone()))
            .collect();
        for record in sidecar.records {
            store.records.insert(record.id.clone(), record);
        }

        let loaded = path
            .to_str()
            .map(|p| store.index.load(p).is_ok())
            .unwrap_or(false);

        if !loaded && !store.records.is_empty() {
            tracing::warn!(
                path = %path.display(),
                "index file missing or unreadable, rebuilding from sidecar"
            );
            store
                .index
                .reserve(store.records.len().max(16))
                .map_err(|e| VectorError::Index(e.to_string()))?;
            for (id, key) in &store.key_to_id {
                if let Some(record) = store.records.get(id) {
                    store
                        .index
                        .add(*key, &record.vector)
                        .map_err(|e| VectorError::Index(e.to_string()))?;
                }
            }
        }

        Ok(store)
    }
}

fn build_index(
    dimension: usize,
    metric: Metric,
    hnsw: &HnswConfig,
) -> Result<Index, VectorError> {
    let options = IndexOptions {
        dimensions: dimension,
        metric: match metric {
            Metric::Cosine => MetricKind::Cos,
            Metric::Euclidean => MetricKind::L2sq,
            Metric::Dot => MetricKind::IP,
        },
        quantization: ScalarKind::F32,
        connectivity: hnsw.m,
        expansion_add: hnsw.ef_construction,
        expansion_search: hnsw.ef_search,
        multi: false,
    };
    Index::new(&options).map_err(|e| VectorError::Index(e.to_string()))
}

/// Map a usearch distance to a similarity in [0, 1]
///
/// Cosine distance is `1 - cos`; inner-product distance is `1 - dot`;
/// L2sq is the squared Euclidean distance.
fn normalize_score(metric: Metric, distance: f32) -> f32 {
    let score = match metric {
        Metric::Cosine => 1.0 - distance,
        Metric::Euclidean => 1.0 / (1.0 + distance.max(0.0).sqrt()),
        Metric::Dot => ((1.0 - distance) + 1.0) / 2.0,
    };
    score.clamp(0.0, 1.0)
}

/// Order hits by score, then access count, then recency, then id
fn sort_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.access_count.cmp(&a.access_count))
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::ItemMetadata;

    const DIM: usize = 64;

    fn basis(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[axis] = 1.0;
        v
    }

    fn store() -> VectorStore {
        VectorStore::new(DIM, Metric::Cosine, &HnswConfig::default()).unwrap()
    }

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord::new(id, vector, ItemMetadata::new(format!("text {id}"), "kb"))
    }

    #[test]
    fn test_insert_and_search_orders_by_similarity() {
        let mut store = store();
        store.insert(record("kb:a", basis(0))).unwrap();
        store.insert(record("kb:b", basis(1))).unwrap();

        let mut query = vec![0.0; DIM];
        query[0] = 0.9;
        query[1] = 0.1;

        let hits = store.search(&query, 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "kb:a");
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut store = store();
        store.insert(record("kb:a", basis(0))).unwrap();
        let result = store.insert(record("kb:a", basis(1)));
        assert!(matches!(result, Err(VectorError::DuplicateId(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected_without_partial_state() {
        let mut store = store();
        let result = store.insert(record("kb:short", vec![1.0, 0.0]));
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
        assert!(!store.contains("kb:short"));
    }

    #[test]
    fn test_delete() {
        let mut store = store();
        store.insert(record("kb:a", basis(0))).unwrap();
        assert!(store.delete("kb:a").unwrap());
        assert!(!store.delete("kb:a").unwrap());
        assert!(store.search(&basis(0), 1, None).unwrap().is_empty());
    }

    #[test]
    fn test_filtered_search_expands_candidate_pool() {
        let mut store = store();
        // Ten items near axis 0, only the last carries the tag
        for i in 0..10 {
            let mut vector = basis(0);
            vector[1] = i as f32 * 0.01;
            let mut item = record(&format!("kb:item-{i}"), vector);
            if i == 9 {
                item.metadata.tags = vec!["rare".into()];
            }
            store.insert(item).unwrap();
        }

        let mut filter = MetadataFilter::default();
        filter.tags = vec!["rare".into()];

        // The tagged item sits at rank 10; the pool must expand past the
        // initial 2*k sample to reach it
        let hits = store.search(&basis(0), 2, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "kb:item-9");
    }

    #[test]
    fn test_filtered_search_gives_up_at_oversample_bound() {
        let mut store = store();
        for i in 0..20 {
            let mut vector = basis(0);
            vector[1] = i as f32 * 0.01;
            let mut item = record(&format!("kb:item-{i}"), vector);
            if i == 19 {
                item.metadata.tags = vec!["rare".into()];
            }
            store.insert(item).unwrap();
        }

        let mut filter = MetadataFilter::default();
        filter.tags = vec!["rare".into()];

        // k=1 bounds the pool at 8 candidates; the match at rank 20 is
        // legitimately out of reach
        let hits = store.search(&basis(0), 1, Some(&filter)).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_euclidean_scores_in_unit_range() {
        let mut store = VectorStore::new(DIM, Metric::Euclidean, &HnswConfig::default()).unwrap();
        store.insert(record("kb:a", basis(0))).unwrap();
        store.insert(record("kb:b", basis(1))).unwrap();

        let hits = store.search(&basis(0), 2, None).unwrap();
        assert_eq!(hits[0].id, "kb:a");
        // Exact match has distance 0 and therefore score 1
        assert!((hits[0].score - 1.0).abs() < 0.01);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[test]
    fn test_tie_break_prefers_access_count() {
        let mut store = store();
        store.insert(record("kb:x", basis(0))).unwrap();
        store.insert(record("kb:y", basis(0))).unwrap();
        store.record_access("kb:y", 5);

        let hits = store.search(&basis(0), 2, None).unwrap();
        assert_eq!(hits[0].id, "kb:y");
    }

    #[test]
    fn test_tier_reclassification() {
        let mut store = store();
        store.insert(record("kb:hot", basis(0))).unwrap();
        store.insert(record("kb:cold", basis(1))).unwrap();
        store.record_access("kb:hot", 10);
        if let Some(r) = store.records.get_mut("kb:cold") {
            r.last_accessed = Utc::now() - Duration::days(90);
        }

        let policy = TieringConfig::default();
        let moved = store.reclassify_tiers(&policy, Utc::now());
        assert_eq!(moved, 2);
        assert_eq!(store.get("kb:hot").unwrap().tier, Tier::Hot);
        assert_eq!(store.get("kb:cold").unwrap().tier, Tier::Cold);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        let mut store = store();
        store.insert(record("kb:a", basis(0))).unwrap();
        store.insert(record("kb:b", basis(1))).unwrap();
        store.record_access("kb:a", 2);
        store.save(&path).unwrap();

        let restored = VectorStore::load(&path, &HnswConfig::default()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("kb:a").unwrap().access_count, 2);

        let hits = restored.search(&basis(0), 1, None).unwrap();
        assert_eq!(hits[0].id, "kb:a");
    }

    #[test]
    fn test_stats_count_tiers() {
        let mut store = store();
        store.insert(record("kb:a", basis(0))).unwrap();
        let stats = store.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.untiered, 1);
    }

    #[test]
    fn test_batch_reports_per_item_outcomes() {
        let mut store = store();
        store.insert(record("kb:dup", basis(0))).unwrap();

        let outcomes = store.insert_batch(vec![
            record("kb:new", basis(1)),
            record("kb:dup", basis(2)),
        ]);
        assert!(outcomes[0].1.is_ok());
        assert!(matches!(outcomes[1].1, Err(VectorError::DuplicateId(_))));
        assert_eq!(store.len(), 2);
    }
}
