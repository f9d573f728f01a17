//! In-memory vector index: an `(n, dim)` matrix paired row-for-row with chunks.
//!
//! The index is immutable once built. A corpus change means building a new
//! index and swapping it in; there is no per-item insert or delete.

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};

use super::error::RetrievalError;
use super::types::{Chunk, SearchResult};
use super::vector_math::{cosine_scores, rank_descending, row_norms};
use crate::core::config::defaults;
use crate::embedding::{Embedder, EmbeddingError};

/// Tunables for the build-time embedding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub batch_size: usize,
    /// Worker threads; 1 keeps the pass on the calling thread.
    pub threads: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: defaults::EMBEDDING_BATCH_SIZE,
            threads: defaults::EMBEDDING_THREADS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_id: String,
    chunks: Vec<Chunk>,
    matrix: Array2<f32>,
    norms: Array1<f32>,
    corpus_fingerprint: String,
    built_at: DateTime<Utc>,
}

impl VectorIndex {
    /// Embed every chunk and pair the vectors with their chunks in order.
    pub fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        options: BuildOptions,
    ) -> Result<Self, RetrievalError> {
        if chunks.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }

        let dimension = embedder.dimension();
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let flat: Vec<f32> = embed_all(&texts, embedder, options)?
            .into_iter()
            .flatten()
            .collect();

        tracing::info!(
            "Built vector index: {} chunks, {} dimensions, model {}",
            chunks.len(),
            dimension,
            embedder.model_id()
        );

        Self::from_parts(
            embedder.model_id().to_string(),
            dimension,
            chunks,
            flat,
            String::new(),
            Utc::now(),
        )
    }

    /// Reassemble an index from persisted parts, enforcing the pairing invariant.
    pub fn from_parts(
        model_id: String,
        dimension: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<f32>,
        corpus_fingerprint: String,
        built_at: DateTime<Utc>,
    ) -> Result<Self, RetrievalError> {
        if dimension == 0 {
            return Err(RetrievalError::Corrupt("index dimension is zero".to_string()));
        }
        if chunks.is_empty() {
            return Err(RetrievalError::Corrupt("index holds no vectors".to_string()));
        }
        if vectors.len() != chunks.len() * dimension {
            return Err(RetrievalError::Corrupt(format!(
                "{} chunks but {} vector values at dimension {}",
                chunks.len(),
                vectors.len(),
                dimension
            )));
        }
        if vectors.iter().any(|v| !v.is_finite()) {
            return Err(RetrievalError::Corrupt(
                "index contains non-finite vector values".to_string(),
            ));
        }
        if let Some(position) = chunks.iter().position(|c| c.text.trim().is_empty()) {
            return Err(RetrievalError::Corrupt(format!(
                "chunk {} has empty text",
                position
            )));
        }

        let matrix = Array2::from_shape_vec((chunks.len(), dimension), vectors)
            .map_err(|err| RetrievalError::Corrupt(err.to_string()))?;
        let norms = row_norms(&matrix);

        Ok(Self {
            model_id,
            chunks,
            matrix,
            norms,
            corpus_fingerprint,
            built_at,
        })
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.corpus_fingerprint = fingerprint.into();
        self
    }

    /// Up to `top_k` chunks scoring at least `min_score`, best first.
    ///
    /// Fewer (or zero) results is a normal outcome. Ties keep build order.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let scores = cosine_scores(&self.matrix, &self.norms, vector)?;

        Ok(rank_descending(&scores)
            .into_iter()
            .filter(|(_, score)| *score >= min_score)
            .take(top_k)
            .map(|(position, score)| SearchResult {
                chunk: self.chunks[position].clone(),
                score,
                position,
            })
            .collect())
    }

    /// Refuse to serve queries embedded by a different model.
    pub fn ensure_compatible(&self, embedder: &dyn Embedder) -> Result<(), RetrievalError> {
        if self.model_id != embedder.model_id() {
            return Err(RetrievalError::ModelMismatch {
                index_model: self.model_id.clone(),
                embedder_model: embedder.model_id().to_string(),
            });
        }
        if self.dimension() != embedder.dimension() {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension(),
                actual: embedder.dimension(),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of stored vectors; always equal to `len()`.
    pub fn vector_count(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn corpus_fingerprint(&self) -> &str {
        &self.corpus_fingerprint
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Vector values in row-major order.
    pub fn vector_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.matrix.iter().copied()
    }
}

/// Embed `texts` in batches, optionally across scoped worker threads.
/// Output order always matches input order.
fn embed_all(
    texts: &[String],
    embedder: &dyn Embedder,
    options: BuildOptions,
) -> Result<Vec<Vec<f32>>, RetrievalError> {
    let batch_size = options.batch_size.max(1);
    let batches: Vec<(usize, &[String])> = texts
        .chunks(batch_size)
        .enumerate()
        .map(|(i, batch)| (i * batch_size, batch))
        .collect();
    let threads = options.threads.clamp(1, batches.len().max(1));

    if threads == 1 {
        let mut vectors = Vec::with_capacity(texts.len());
        for (offset, batch) in &batches {
            vectors.extend(embed_batch(embedder, *offset, batch)?);
            tracing::debug!("Embedded {}/{} chunks", vectors.len(), texts.len());
        }
        return Ok(vectors);
    }

    let per_worker = batches.len().div_ceil(threads);
    let results: Vec<Result<Vec<Vec<f32>>, RetrievalError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = batches
            .chunks(per_worker)
            .map(|group| {
                scope.spawn(move || -> Result<Vec<Vec<f32>>, RetrievalError> {
                    let mut vectors = Vec::new();
                    for (offset, batch) in group {
                        vectors.extend(embed_batch(embedder, *offset, batch)?);
                    }
                    Ok(vectors)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(RetrievalError::Embedding(EmbeddingError::Inference(
                        "embedding worker panicked".to_string(),
                    )))
                })
            })
            .collect()
    });

    let mut vectors = Vec::with_capacity(texts.len());
    for result in results {
        vectors.extend(result?);
    }
    Ok(vectors)
}

fn embed_batch(
    embedder: &dyn Embedder,
    offset: usize,
    batch: &[String],
) -> Result<Vec<Vec<f32>>, RetrievalError> {
    let vectors = embedder.embed_batch(batch).map_err(|err| match err {
        EmbeddingError::EmptyBatchItem(index) => EmbeddingError::EmptyBatchItem(offset + index),
        other => other,
    })?;
    if vectors.len() != batch.len() {
        return Err(RetrievalError::Embedding(EmbeddingError::Inference(format!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            batch.len()
        ))));
    }
    let dimension = embedder.dimension();
    if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimension) {
        return Err(RetrievalError::Embedding(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        }));
    }
    if vectors.iter().flatten().any(|v| !v.is_finite()) {
        return Err(RetrievalError::Embedding(EmbeddingError::Inference(
            "embedder produced non-finite values".to_string(),
        )));
    }
    Ok(vectors)
}
