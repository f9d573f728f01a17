//! Text-to-vector embedding profiles.
//!
//! Two profiles sit behind the [`Embedder`] trait:
//! - `hashing`: deterministic feature hashing, no model files (default).
//! - `onnx`: sentence-transformer inference through ONNX Runtime, compiled in
//!   with the `onnx` cargo feature.
//!
//! All methods are synchronous and CPU-bound; async callers go through
//! `tokio::task::spawn_blocking`.

mod hashing;
#[cfg(feature = "onnx")]
mod onnx;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::core::config::defaults;

pub use hashing::HashingEmbedder;
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("cannot embed empty text at batch position {0}")]
    EmptyBatchItem(usize),
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("embedding inference failed: {0}")]
    Inference(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Deterministic text encoder. Same text and model always give the same vector.
pub trait Embedder: Send + Sync {
    /// Identifier persisted alongside an index; vectors from different ids never mix.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed one text. Empty or whitespace-only input is rejected.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts, in order. Used at build time for throughput.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| {
                self.embed(text).map_err(|err| match err {
                    EmbeddingError::EmptyInput => EmbeddingError::EmptyBatchItem(index),
                    other => other,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingSettings {
    /// `hashing` or `onnx`.
    pub model: String,
    pub dimension: usize,
    pub model_path: Option<PathBuf>,
    pub tokenizer_path: Option<PathBuf>,
    pub batch_size: usize,
    /// Worker threads for build-time batch embedding (and ONNX intra-op threads).
    pub threads: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: defaults::EMBEDDING_MODEL.to_string(),
            dimension: defaults::EMBEDDING_DIMENSION,
            model_path: None,
            tokenizer_path: None,
            batch_size: defaults::EMBEDDING_BATCH_SIZE,
            threads: defaults::EMBEDDING_THREADS,
        }
    }
}

/// Instantiate the configured embedding profile.
///
/// Model-load failures surface as [`EmbeddingError::ModelUnavailable`]; the
/// retrieval service treats them as fatal for retrieval.
pub fn create_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match settings.model.trim().to_ascii_lowercase().as_str() {
        "hashing" | "" => Ok(Arc::new(HashingEmbedder::new(settings.dimension)?)),
        "onnx" => create_onnx_embedder(settings),
        other => Err(EmbeddingError::ModelUnavailable(format!(
            "unknown embedding model '{}'; supported: hashing, onnx",
            other
        ))),
    }
}

#[cfg(feature = "onnx")]
fn create_onnx_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let (Some(model_path), Some(tokenizer_path)) =
        (settings.model_path.as_ref(), settings.tokenizer_path.as_ref())
    else {
        return Err(EmbeddingError::ModelUnavailable(
            "embedding.model_path and embedding.tokenizer_path are required for onnx".to_string(),
        ));
    };
    let embedder = OnnxEmbedder::new(model_path, tokenizer_path, settings.threads)?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "onnx"))]
fn create_onnx_embedder(_settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Err(EmbeddingError::ModelUnavailable(
        "this build does not include the onnx feature".to_string(),
    ))
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_hashing_profile_by_default() {
        let embedder = create_embedder(&EmbeddingSettings::default()).unwrap();
        assert_eq!(embedder.dimension(), 384);
        assert!(embedder.model_id().starts_with("hashing"));
    }

    #[test]
    fn unknown_model_is_unavailable() {
        let settings = EmbeddingSettings {
            model: "word2vec".to_string(),
            ..Default::default()
        };
        let err = create_embedder(&settings).err().unwrap();
        assert!(matches!(err, EmbeddingError::ModelUnavailable(_)));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn onnx_without_feature_is_unavailable() {
        let settings = EmbeddingSettings {
            model: "onnx".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_embedder(&settings).err().unwrap(),
            EmbeddingError::ModelUnavailable(_)
        ));
    }

    #[test]
    fn batch_reports_position_of_empty_text() {
        let embedder = HashingEmbedder::new(32).unwrap();
        let texts = vec!["channels".to_string(), "   ".to_string()];
        let err = embedder.embed_batch(&texts).unwrap_err();
        assert!(matches!(err, EmbeddingError::EmptyBatchItem(1)));
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut zero = vec![0.0; 4];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 4]);

        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
