//! Shared test fixtures

use std::collections::HashMap;
use std::sync::Arc;

use engram_core::{EmbeddingError, EmbeddingProvider, HashingEmbedder};

/// Dimension used by fixture collections (smallest the engine accepts)
pub const DIM: usize = 64;

/// A unit vector along `axis`, padded to `dim`
pub fn basis(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[axis] = 1.0;
    v
}

/// Deterministic embedder with pinned vectors for known texts
///
/// Unknown texts fall back to the hashing provider so incidental embeds
/// (trajectory steps, router probes) still succeed.
pub struct FixtureEmbedder {
    pinned: HashMap<String, Vec<f32>>,
    fallback: HashingEmbedder,
}

impl FixtureEmbedder {
    pub fn new(pinned: impl IntoIterator<Item = (&'static str, Vec<f32>)>) -> Arc<Self> {
        Arc::new(Self {
            pinned: pinned
                .into_iter()
                .map(|(text, vector)| (text.to_string(), vector))
                .collect(),
            fallback: HashingEmbedder::new(),
        })
    }
}

impl EmbeddingProvider for FixtureEmbedder {
    fn name(&self) -> &str {
        "fixture"
    }

    fn embed_one(&self, text: &str, dimension: usize) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(vector) = self.pinned.get(text) {
            let mut padded = vector.clone();
            padded.resize(dimension, 0.0);
            return Ok(padded);
        }
        self.fallback.embed_one(text, dimension)
    }
}
