//! Pattern discovery
//!
//! Clusters completed trajectories by their mean step vector into reasoning
//! patterns. Seeding is deterministic farthest-point (the greedy variant of
//! k-means++ seeding), so repeated passes over the same data converge to
//! the same bank, keeping the background pass idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embeddings::euclidean_distance;

/// Lloyd iterations per clustering pass
const MAX_ITERATIONS: usize = 20;

/// A cluster centroid over trajectory step vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningPattern {
    /// Pattern id
    pub id: String,
    /// Cluster centroid in embedding space
    pub centroid: Vec<f32>,
    /// Trajectories in the cluster
    pub cluster_size: usize,
    /// Mean quality of member trajectories
    pub avg_quality: f32,
    /// Ids of member trajectories (exemplars)
    pub exemplar_trajectories: Vec<String>,
    /// When the bank was rebuilt
    pub updated_at: DateTime<Utc>,
}

/// Cluster `(trajectory_id, mean_step_vector, quality)` triples
///
/// Clusters smaller than `min_cluster` are discarded; `k` is a ceiling,
/// not a promise.
pub fn cluster_step_vectors(
    items: &[(String, Vec<f32>, f32)],
    k: usize,
    min_cluster: usize,
) -> Vec<ReasoningPattern> {
    if items.is_empty() || k == 0 {
        return vec![];
    }
    let dim = items[0].1.len();
    let items: Vec<&(String, Vec<f32>, f32)> =
        items.iter().filter(|(_, v, _)| v.len() == dim).collect();
    if items.is_empty() {
        return vec![];
    }

    let k = k.min(items.len());
    let mut centroids = seed_centroids(&items, k);

    let mut assignment = vec![0usize; items.len()];
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (index, (_, vector, _)) in items.iter().enumerate() {
            let nearest = nearest_centroid(vector, &centroids);
            if assignment[index] != nearest {
                assignment[index] = nearest;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0_f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (index, (_, vector, _)) in items.iter().enumerate() {
            let cluster = assignment[index];
            counts[cluster] += 1;
            for (slot, value) in sums[cluster].iter_mut().zip(vector.iter()) {
                *slot += value;
            }
        }
        for (cluster, sum) in sums.iter().enumerate() {
            if counts[cluster] > 0 {
                centroids[cluster] = sum
                    .iter()
                    .map(|value| value / counts[cluster] as f32)
                    .collect();
            }
        }

        if !changed {
            break;
        }
    }

    let now = Utc::now();
    (0..centroids.len())
        .filter_map(|cluster| {
            let members: Vec<&(String, Vec<f32>, f32)> = items
                .iter()
                .enumerate()
                .filter(|(index, _)| assignment[*index] == cluster)
                .map(|(_, item)| *item)
                .collect();
            if members.len() < min_cluster {
                return None;
            }
            let avg_quality =
                members.iter().map(|(_, _, q)| q).sum::<f32>() / members.len() as f32;
            Some(ReasoningPattern {
                id: Uuid::new_v4().to_string(),
                centroid: centroids[cluster].clone(),
                cluster_size: members.len(),
                avg_quality,
                exemplar_trajectories: members.iter().map(|(id, _, _)| id.clone()).collect(),
                updated_at: now,
            })
        })
        .collect()
}

/// Deterministic farthest-point seeding
fn seed_centroids(items: &[&(String, Vec<f32>, f32)], k: usize) -> Vec<Vec<f32>> {
    let mut centroids = vec![items[0].1.clone()];
    while centroids.len() < k {
        let farthest = items
            .iter()
            .max_by(|a, b| {
                let da = min_distance(&a.1, &centroids);
                let db = min_distance(&b.1, &centroids);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|item| item.1.clone());
        match farthest {
            Some(candidate) if min_distance(&candidate, &centroids) > 0.0 => {
                centroids.push(candidate);
            }
            // All remaining points coincide with a centroid
            _ => break,
        }
    }
    centroids
}

fn min_distance(vector: &[f32], centroids: &[Vec<f32>]) -> f32 {
    centroids
        .iter()
        .map(|centroid| euclidean_distance(vector, centroid))
        .fold(f32::MAX, f32::min)
}

fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::MAX;
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = euclidean_distance(vector, centroid);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, vector: Vec<f32>, quality: f32) -> (String, Vec<f32>, f32) {
        (id.to_string(), vector, quality)
    }

    #[test]
    fn test_two_well_separated_clusters() {
        let items = vec![
            item("t1", vec![1.0, 0.0], 0.8),
            item("t2", vec![0.9, 0.1], 0.6),
            item("t3", vec![0.0, 1.0], 0.4),
            item("t4", vec![0.1, 0.9], 0.2),
        ];

        let patterns = cluster_step_vectors(&items, 2, 2);
        assert_eq!(patterns.len(), 2);
        assert!(patterns.iter().all(|p| p.cluster_size == 2));

        let qualities: Vec<f32> = patterns.iter().map(|p| p.avg_quality).collect();
        assert!(qualities.contains(&0.7) || qualities.iter().any(|q| (q - 0.7).abs() < 0.001));
    }

    #[test]
    fn test_small_clusters_discarded() {
        let items = vec![
            item("t1", vec![1.0, 0.0], 0.8),
            item("t2", vec![0.95, 0.05], 0.8),
            item("t3", vec![0.9, 0.1], 0.8),
            item("outlier", vec![-1.0, 0.0], 0.1),
        ];

        let patterns = cluster_step_vectors(&items, 2, 2);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].cluster_size, 3);
        assert!(!patterns[0]
            .exemplar_trajectories
            .contains(&"outlier".to_string()));
    }

    #[test]
    fn test_deterministic_across_passes() {
        let items = vec![
            item("t1", vec![1.0, 0.0], 0.5),
            item("t2", vec![0.0, 1.0], 0.5),
            item("t3", vec![0.9, 0.1], 0.5),
            item("t4", vec![0.1, 0.9], 0.5),
        ];

        let a = cluster_step_vectors(&items, 2, 1);
        let b = cluster_step_vectors(&items, 2, 1);
        assert_eq!(a.len(), b.len());
        for (pa, pb) in a.iter().zip(b.iter()) {
            assert_eq!(pa.centroid, pb.centroid);
            assert_eq!(pa.exemplar_trajectories, pb.exemplar_trajectories);
        }
    }

    #[test]
    fn test_empty_and_degenerate_inputs() {
        assert!(cluster_step_vectors(&[], 3, 1).is_empty());

        let single = vec![item("t1", vec![1.0, 0.0], 0.9)];
        let patterns = cluster_step_vectors(&single, 3, 1);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].cluster_size, 1);

        // Identical points collapse to one centroid
        let identical = vec![
            item("t1", vec![0.5, 0.5], 0.5),
            item("t2", vec![0.5, 0.5], 0.5),
        ];
        let patterns = cluster_step_vectors(&identical, 2, 1);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].cluster_size, 2);
    }
}
