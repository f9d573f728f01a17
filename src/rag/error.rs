use std::path::PathBuf;

use thiserror::Error;

use crate::embedding::EmbeddingError;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("corpus at {root} produced no chunks")]
    EmptyCorpus { root: PathBuf },

    #[error("cannot build an index from an empty chunk list")]
    EmptyIndex,

    #[error("corpus directory not found: {root}")]
    CorpusMissing { root: PathBuf },

    #[error("index is corrupt: {0}")]
    Corrupt(String),

    #[error("index was built with '{index_model}' but the embedder is '{embedder_model}'")]
    ModelMismatch {
        index_model: String,
        embedder_model: String,
    },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
}

impl RetrievalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RetrievalError::Io {
            path: path.into(),
            source,
        }
    }

    /// Persisted state that cannot be trusted. Never repaired silently.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RetrievalError::Corrupt(_)
                | RetrievalError::ModelMismatch { .. }
                | RetrievalError::DimensionMismatch { .. }
        )
    }

    /// Deployment problems: bad config, empty or missing corpus, missing model.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RetrievalError::Config(_)
                | RetrievalError::EmptyCorpus { .. }
                | RetrievalError::EmptyIndex
                | RetrievalError::CorpusMissing { .. }
                | RetrievalError::Embedding(EmbeddingError::ModelUnavailable(_))
        )
    }
}
