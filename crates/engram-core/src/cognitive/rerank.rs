//! Graph-aware reranking
//!
//! The reranker is a capability behind a trait with a null implementation;
//! the retrieval path always calls through the trait and never branches on
//! presence. The graph-attention variant replaces each candidate's graph
//! score with soft attention over its neighbourhood's similarity to the
//! query; the null variant passes scores through with `gnn_boost = 1.0`.

use crate::embeddings::cosine_similarity;

/// A candidate handed to the reranker
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    /// Item id
    pub id: String,
    /// Chunk text
    pub text: String,
    /// Normalised vector score
    pub vector_score: f32,
    /// Graph score from neighbourhood counting
    pub graph_score: f32,
    /// Embeddings of the candidate's graph neighbours
    pub neighbor_vectors: Vec<Vec<f32>>,
}

/// Per-candidate reranker output
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    /// Item id
    pub id: String,
    /// Possibly overridden graph score
    pub graph_score: f32,
    /// Multiplier applied by the reranker (1.0 = neutral)
    pub gnn_boost: f32,
}

/// Reranking capability
pub trait Reranker: Send + Sync {
    /// Short name for stats and logs
    fn name(&self) -> &str;

    /// Score the candidates; output order matches input order
    fn rerank(&self, query: &[f32], candidates: &[RerankCandidate]) -> Vec<RerankOutcome>;
}

// ============================================================================
// NULL RERANKER
// ============================================================================

/// Pass-through reranker used when the capability is unavailable
#[derive(Debug, Clone, Default)]
pub struct NoopReranker;

impl Reranker for NoopReranker {
    fn name(&self) -> &str {
        "noop"
    }

    fn rerank(&self, _query: &[f32], candidates: &[RerankCandidate]) -> Vec<RerankOutcome> {
        candidates
            .iter()
            .map(|candidate| RerankOutcome {
                id: candidate.id.clone(),
                graph_score: candidate.graph_score,
                gnn_boost: 1.0,
            })
            .collect()
    }
}

// ============================================================================
// GRAPH ATTENTION
// ============================================================================

/// Softmax attention over the candidate's neighbourhood
///
/// For each candidate with neighbours n_i, weights are
/// `softmax(cos(query, n_i) / temperature)` and the attended similarity
/// `sum(w_i * cos(query, n_i))` becomes the graph score after mapping
/// from [-1, 1] into [0, 1]. Candidates without neighbours keep their
/// counting-based score.
#[derive(Debug, Clone)]
pub struct GraphAttentionReranker {
    /// Softmax temperature; lower is sharper
    pub temperature: f32,
}

impl Default for GraphAttentionReranker {
    fn default() -> Self {
        Self { temperature: 0.5 }
    }
}

impl Reranker for GraphAttentionReranker {
    fn name(&self) -> &str {
        "graph-attention"
    }

    fn rerank(&self, query: &[f32], candidates: &[RerankCandidate]) -> Vec<RerankOutcome> {
        candidates
            .iter()
            .map(|candidate| {
                if candidate.neighbor_vectors.is_empty() {
                    return RerankOutcome {
                        id: candidate.id.clone(),
                        graph_score: candidate.graph_score,
                        gnn_boost: 1.0,
                    };
                }

                let similarities: Vec<f32> = candidate
                    .neighbor_vectors
                    .iter()
                    .map(|neighbor| cosine_similarity(query, neighbor))
                    .collect();

                let temperature = self.temperature.max(1e-3);
                let max_similarity = similarities
                    .iter()
                    .cloned()
                    .fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = similarities
                    .iter()
                    .map(|s| ((s - max_similarity) / temperature).exp())
                    .collect();
                let denom: f32 = exps.iter().sum();

                let attended: f32 = similarities
                    .iter()
                    .zip(exps.iter())
                    .map(|(similarity, weight)| similarity * weight / denom)
                    .sum();

                let graph_score = ((attended + 1.0) / 2.0).clamp(0.0, 1.0);
                RerankOutcome {
                    id: candidate.id.clone(),
                    graph_score,
                    gnn_boost: (1.0 + attended).max(0.0),
                }
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, graph_score: f32, neighbors: Vec<Vec<f32>>) -> RerankCandidate {
        RerankCandidate {
            id: id.to_string(),
            text: format!("text {id}"),
            vector_score: 0.5,
            graph_score,
            neighbor_vectors: neighbors,
        }
    }

    #[test]
    fn test_noop_is_neutral() {
        let reranker = NoopReranker;
        let outcomes = reranker.rerank(
            &[1.0, 0.0],
            &[candidate("a", 0.4, vec![vec![0.0, 1.0]])],
        );
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].graph_score, 0.4);
        assert_eq!(outcomes[0].gnn_boost, 1.0);
    }

    #[test]
    fn test_attention_rewards_aligned_neighbourhood() {
        let reranker = GraphAttentionReranker::default();
        let query = vec![1.0, 0.0];

        let outcomes = reranker.rerank(
            &query,
            &[
                candidate("aligned", 0.1, vec![vec![1.0, 0.0], vec![0.9, 0.1]]),
                candidate("opposed", 0.1, vec![vec![-1.0, 0.0]]),
            ],
        );

        assert!(outcomes[0].graph_score > outcomes[1].graph_score);
        assert!(outcomes[0].gnn_boost > outcomes[1].gnn_boost);
        assert!((0.0..=1.0).contains(&outcomes[0].graph_score));
        assert!((0.0..=1.0).contains(&outcomes[1].graph_score));
    }

    #[test]
    fn test_attention_without_neighbours_is_neutral() {
        let reranker = GraphAttentionReranker::default();
        let outcomes = reranker.rerank(&[1.0, 0.0], &[candidate("lonely", 0.3, vec![])]);
        assert_eq!(outcomes[0].graph_score, 0.3);
        assert_eq!(outcomes[0].gnn_boost, 1.0);
    }

    #[test]
    fn test_output_order_matches_input() {
        let reranker = GraphAttentionReranker::default();
        let outcomes = reranker.rerank(
            &[1.0, 0.0],
            &[
                candidate("first", 0.0, vec![vec![1.0, 0.0]]),
                candidate("second", 0.0, vec![]),
            ],
        );
        assert_eq!(outcomes[0].id, "first");
        assert_eq!(outcomes[1].id, "second");
    }
}
