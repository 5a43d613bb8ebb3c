//! Embedding port
//!
//! Abstract interface producing fixed-dimension vectors from text. The
//! engine treats the port as pure: determinism and latency are backend
//! concerns. Providers are interchangeable behind [`EmbeddingProvider`]:
//!
//! - [`HashingEmbedder`]: deterministic feature-hashing projection, always
//!   available, no model files. The offline and test backbone.
//! - `FastembedProvider` (feature `embeddings`): local ONNX inference.
//! - `RemoteEmbedder` (feature `remote-embeddings`): Ollama-compatible HTTP
//!   endpoint with bounded retries.

mod hashing;

#[cfg(feature = "embeddings")]
mod local;

#[cfg(feature = "remote-embeddings")]
mod remote;

pub use hashing::HashingEmbedder;

#[cfg(feature = "embeddings")]
pub use local::FastembedProvider;

#[cfg(feature = "remote-embeddings")]
pub use remote::{RemoteEmbedder, RemoteEmbedderConfig};

use crate::error::EngramError;

/// Maximum text length passed to a backend (longer inputs are truncated)
pub const MAX_TEXT_LENGTH: usize = 8192;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    /// Backend could not be reached or failed to produce output
    BackendUnavailable(String),
    /// Produced or requested dimension does not match the collection
    DimensionMismatch {
        /// Dimension the caller asked for
        requested: usize,
        /// Dimension the backend can produce
        produced: usize,
    },
    /// Empty or otherwise unusable input
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::BackendUnavailable(e) => write!(f, "backend unavailable: {}", e),
            EmbeddingError::DimensionMismatch {
                requested,
                produced,
            } => write!(
                f,
                "dimension mismatch: requested {}, backend produces {}",
                requested, produced
            ),
            EmbeddingError::InvalidInput(e) => write!(f, "invalid input: {}", e),
        }
    }
}

impl std::error::Error for EmbeddingError {}

impl From<EmbeddingError> for EngramError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::InvalidInput(msg) => EngramError::InvalidInput(msg),
            EmbeddingError::DimensionMismatch { .. } => EngramError::InvalidInput(e.to_string()),
            EmbeddingError::BackendUnavailable(msg) => {
                EngramError::EmbeddingBackendUnavailable(msg)
            }
        }
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Pluggable embedding backend
///
/// Contract: the output has exactly `dimension` components and a finite,
/// non-zero L2 norm. Providers that serve cosine collections return
/// unit-normalised vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name for stats and logs
    fn name(&self) -> &str;

    /// Embed a single text into `dimension` components
    fn embed_one(&self, text: &str, dimension: usize) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch; same semantics as `embed_one` per element
    fn embed_many(
        &self,
        texts: &[&str],
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts
            .iter()
            .map(|text| self.embed_one(text, dimension))
            .collect()
    }
}

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// Compute Euclidean distance between two vectors
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Compute dot product between two vectors
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2-normalise a vector in place; leaves all-zero vectors untouched
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Truncate a vector to `dimension` components and re-normalise
///
/// Valid for Matryoshka-trained models where the first N dimensions are a
/// usable N-dimensional representation.
pub fn truncate_normalized(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() > dimension {
        vector.truncate(dimension);
    }
    l2_normalize(&mut vector);
    vector
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.0001);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((euclidean_distance(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_truncate_normalized_is_unit_length() {
        let v = truncate_normalized(vec![3.0, 4.0, 5.0, 6.0], 2);
        assert_eq!(v.len(), 2);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_error_maps_into_surface_kinds() {
        let backend: EngramError =
            EmbeddingError::BackendUnavailable("connection refused".into()).into();
        assert!(matches!(
            backend,
            EngramError::EmbeddingBackendUnavailable(_)
        ));

        let invalid: EngramError = EmbeddingError::InvalidInput("empty text".into()).into();
        assert!(matches!(invalid, EngramError::InvalidInput(_)));
    }
}
