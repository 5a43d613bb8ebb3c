//! Deterministic feature-hashing embedder
//!
//! Projects text into a fixed-dimension space by hashing word unigrams and
//! character trigrams into signed buckets, then L2-normalising. No model
//! files, no network, bit-for-bit deterministic across runs and platforms.
//! Semantically close texts share tokens and therefore buckets, which is
//! enough signal for local retrieval and for exercising the full engine in
//! tests and offline deployments.

use super::{EmbeddingError, EmbeddingProvider, MAX_TEXT_LENGTH, l2_normalize};

/// Weight of character trigram features relative to word features
const TRIGRAM_WEIGHT: f32 = 0.35;

/// Deterministic hashing embedding provider
#[derive(Debug, Clone, Default)]
pub struct HashingEmbedder {
    _private: (),
}

impl HashingEmbedder {
    /// Create a new hashing embedder
    pub fn new() -> Self {
        Self::default()
    }

    fn accumulate(vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % vector.len() as u64) as usize;
        // Second independent bit decides the sign, per the hashing trick
        let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed_one(&self, text: &str, dimension: usize) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }
        if dimension == 0 {
            return Err(EmbeddingError::DimensionMismatch {
                requested: dimension,
                produced: 0,
            });
        }

        let text = if text.len() > MAX_TEXT_LENGTH {
            // Truncate on a char boundary
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let mut vector = vec![0.0_f32; dimension];
        let lowered = text.to_lowercase();

        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            Self::accumulate(&mut vector, token.as_bytes(), 1.0);

            let chars: Vec<char> = token.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let trigram: String = window.iter().collect();
                    Self::accumulate(&mut vector, trigram.as_bytes(), TRIGRAM_WEIGHT);
                }
            }
        }

        // Hash collisions can in principle cancel to zero; the port contract
        // requires a non-zero norm, so pin a deterministic component.
        if vector.iter().all(|x| *x == 0.0) {
            vector[0] = 1.0;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// FNV-1a over a byte slice
#[inline]
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
