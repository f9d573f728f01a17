//! Document retrieval for grounding chat answers.
//!
//! # Components
//!
//! - `loader` / `chunker`: corpus walk, markdown cleaning, passage splitting
//! - `index`: embedded passages with cosine top-k queries
//! - `persist`: the `.index`/`.data` companion files
//! - `context_builder`: context text and deduplicated citations
//! - `service`: startup state machine and the `search` entry point

mod chunker;
mod context_builder;
mod error;
mod index;
mod loader;
pub mod persist;
mod service;
mod types;
mod vector_math;

#[cfg(test)]
mod tests;

pub use chunker::{ChunkSettings, Chunker};
pub use context_builder::{ContextAssembler, BLOCK_DELIMITER};
pub use error::RetrievalError;
pub use index::{BuildOptions, VectorIndex};
pub use loader::{corpus_fingerprint, load_corpus, scan_corpus, Corpus, LoaderSettings};
pub use persist::{IndexInspection, IndexPaths};
pub use service::{IndexOrigin, RetrievalService, RetrievalStatus, ServiceState, StartProfile};
pub use types::{Chunk, CitationRef, SearchResponse, SearchResult};
