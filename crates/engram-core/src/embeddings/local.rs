//! Local ONNX embedding provider
//!
//! Uses fastembed for on-device inference (nomic-embed-text-v1.5, 768
//! dimensions, Matryoshka support). The model is loaded lazily into a
//! process-wide cell on first use; construction never touches the network.

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{EmbeddingError, EmbeddingProvider, MAX_TEXT_LENGTH, truncate_normalized};

/// Native output dimension of the bundled model
pub const MODEL_DIMENSIONS: usize = 768;

/// Batch size for efficient inference
const BATCH_SIZE: usize = 32;

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = MODEL.get_or_init(|| {
        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!("failed to initialize nomic-embed-text-v1.5: {e}")
        })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::BackendUnavailable(format!("model lock poisoned: {e}"))),
        Err(err) => Err(EmbeddingError::BackendUnavailable(err.clone())),
    }
}

fn clip(text: &str) -> &str {
    if text.len() > MAX_TEXT_LENGTH {
        let mut end = MAX_TEXT_LENGTH;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    } else {
        text
    }
}

/// Embedding provider backed by a local fastembed model
#[derive(Debug, Clone, Default)]
pub struct FastembedProvider {
    _private: (),
}

impl FastembedProvider {
    /// Create the provider; the model loads on first embed call
    pub fn new() -> Self {
        Self::default()
    }

    /// Force model initialization (downloads on first ever use)
    pub fn init(&self) -> Result<(), EmbeddingError> {
        get_model().map(|_| ())
    }
}

impl EmbeddingProvider for FastembedProvider {
    fn name(&self) -> &str {
        "fastembed/nomic-embed-text-v1.5"
    }

    fn embed_one(&self, text: &str, dimension: usize) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }
        if dimension > MODEL_DIMENSIONS {
            return Err(EmbeddingError::DimensionMismatch {
                requested: dimension,
                produced: MODEL_DIMENSIONS,
            });
        }

        let mut model = get_model()?;
        let embeddings = model
            .embed(vec![clip(text)], None)
            .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .map(|v| truncate_normalized(v, dimension))
            .ok_or_else(|| EmbeddingError::BackendUnavailable("no embedding produced".into()))
    }

    fn embed_many(
        &self,
        texts: &[&str],
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if dimension > MODEL_DIMENSIONS {
            return Err(EmbeddingError::DimensionMismatch {
                requested: dimension,
                produced: MODEL_DIMENSIONS,
            });
        }

        let mut model = get_model()?;
        let mut all = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let clipped: Vec<&str> = chunk.iter().map(|t| clip(t)).collect();
            let embeddings = model
                .embed(clipped, None)
                .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;
            for emb in embeddings {
                all.push(truncate_normalized(emb, dimension));
            }
        }

        Ok(all)
    }
}
