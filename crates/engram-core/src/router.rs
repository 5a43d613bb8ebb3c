//! Semantic router
//!
//! Classifies a query string into an intent and emits an execution plan
//! that shapes the search (k, graph depth, reranking, parallel fan-out).
//! The classifier sits behind a trait so a learned model can replace the
//! keyword heuristics without callers noticing; both emit the same
//! contract: intent, confidence, complexity, plan, rationale.

use serde::{Deserialize, Serialize};

use crate::config::RouterConfig;

// ============================================================================
// INTENTS & PLANS
// ============================================================================

/// Query intent classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    /// Direct lookup ("find", "search", proper nouns)
    Retrieval,
    /// Relationship-centric ("related to", "cites")
    Relational,
    /// Aggregation ("summarise", "overview")
    Summary,
    /// Mixed signals or complex predicates
    Hybrid,
}

impl QueryIntent {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Retrieval => "retrieval",
            QueryIntent::Relational => "relational",
            QueryIntent::Summary => "summary",
            QueryIntent::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a routed query should execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Result count to aim for
    pub k: usize,
    /// Graph expansion depth (0 = vector-only)
    pub graph_depth: usize,
    /// Whether the cognitive reranker should run
    pub rerank: bool,
    /// Whether collection fan-out may run in parallel
    pub parallel: bool,
}

impl ExecutionPlan {
    /// The plan for a given intent
    pub fn for_intent(intent: QueryIntent) -> Self {
        match intent {
            QueryIntent::Retrieval => Self {
                k: 6,
                graph_depth: 0,
                rerank: false,
                parallel: false,
            },
            QueryIntent::Relational => Self {
                k: 10,
                graph_depth: 2,
                rerank: true,
                parallel: false,
            },
            QueryIntent::Summary => Self {
                k: 15,
                graph_depth: 1,
                rerank: true,
                parallel: false,
            },
            QueryIntent::Hybrid => Self {
                k: 10,
                graph_depth: 2,
                rerank: true,
                parallel: true,
            },
        }
    }
}

/// Classifier output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecision {
    /// Classified intent
    pub intent: QueryIntent,
    /// Classification confidence in [0, 1]
    pub confidence: f32,
    /// Estimated query complexity in [0, 1]
    pub complexity: f32,
    /// Suggested execution plan
    pub plan: ExecutionPlan,
    /// Human-readable explanation of the decision
    pub rationale: String,
}

/// Pluggable intent classifier
pub trait IntentClassifier: Send + Sync {
    /// Classify a query and emit a plan
    fn classify(&self, query: &str) -> RouteDecision;
}

// ============================================================================
// KEYWORD CLASSIFIER
// ============================================================================

const RETRIEVAL_CUES: &[&str] = &[
    "find", "search", "lookup", "look up", "locate", "fetch", "get", "show me", "what is",
    "who is", "where is",
];

const RELATIONAL_CUES: &[&str] = &[
    "related to",
    "relates to",
    "relationship",
    "cites",
    "cited by",
    "citation",
    "references",
    "connected to",
    "connection between",
    "linked to",
    "links to",
    "depends on",
    "derived from",
];

const SUMMARY_CUES: &[&str] = &[
    "summarise",
    "summarize",
    "summary",
    "overview",
    "aggregate",
    "recap",
    "outline",
    "digest",
    "everything about",
    "all about",
];

/// Keyword-heuristic classifier
pub struct KeywordClassifier {
    threshold: f32,
}

impl KeywordClassifier {
    /// Build a classifier with the configured fallback threshold
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            threshold: config.intent_threshold,
        }
    }

    fn cue_hits(lower: &str, cues: &[&str]) -> usize {
        cues.iter().filter(|cue| lower.contains(*cue)).count()
    }

    /// Proper-noun heuristic: capitalised words past the first
    fn proper_nouns(query: &str) -> usize {
        query
            .split_whitespace()
            .skip(1)
            .filter(|word| {
                word.chars()
                    .next()
                    .map(|c| c.is_uppercase())
                    .unwrap_or(false)
            })
            .count()
    }

    fn complexity(query: &str) -> f32 {
        let words = query.split_whitespace().count() as f32;
        let conjunctions = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| matches!(*w, "and" | "or" | "but" | "then"))
            .count() as f32;
        let clauses = query.matches([',', ';']).count() as f32;
        (words / 20.0 + conjunctions * 0.15 + clauses * 0.1).clamp(0.0, 1.0)
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, query: &str) -> RouteDecision {
        let lower = query.to_lowercase();
        let complexity = Self::complexity(query);

        let retrieval =
            Self::cue_hits(&lower, RETRIEVAL_CUES) + usize::from(Self::proper_nouns(query) > 0);
        let relational = Self::cue_hits(&lower, RELATIONAL_CUES);
        let summary = Self::cue_hits(&lower, SUMMARY_CUES);

        let scored = [
            (QueryIntent::Retrieval, retrieval),
            (QueryIntent::Relational, relational),
            (QueryIntent::Summary, summary),
        ];
        let total: usize = scored.iter().map(|(_, s)| s).sum();
        let (top_intent, top_score) = scored
            .iter()
            .max_by_key(|(_, score)| *score)
            .copied()
            .unwrap_or((QueryIntent::Hybrid, 0));
        let distinct_signals = scored.iter().filter(|(_, score)| *score > 0).count();

        // Multiple intent families firing at once means the query is mixed
        let (intent, confidence, rationale) = if total == 0 {
            (
                QueryIntent::Hybrid,
                0.0,
                "no intent cues matched".to_string(),
            )
        } else if distinct_signals > 1 && complexity > 0.3 {
            (
                QueryIntent::Hybrid,
                0.5,
                format!("{distinct_signals} intent families matched a complex query"),
            )
        } else {
            let confidence =
                (top_score as f32 / total as f32) * (1.0 - 0.3 * (distinct_signals - 1) as f32);
            (
                top_intent,
                confidence.clamp(0.0, 1.0),
                format!("{top_score} of {total} cues matched {top_intent}"),
            )
        };

        // Low confidence always falls back to the widest plan
        let (intent, rationale) = if confidence < self.threshold && intent != QueryIntent::Hybrid {
            (
                QueryIntent::Hybrid,
                format!("{rationale}; below threshold, falling back to hybrid"),
            )
        } else {
            (intent, rationale)
        };

        RouteDecision {
            intent,
            confidence,
            complexity,
            plan: ExecutionPlan::for_intent(intent),
            rationale,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
