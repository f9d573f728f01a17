use serde::{Deserialize, Serialize};

/// A bounded passage of one corpus document, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Passage text; never empty after trimming.
    pub text: String,
    /// Canonical URL of the parent document (or its relative path).
    pub source: String,
    /// Document title; may be empty.
    #[serde(default)]
    pub title: String,
    /// Position within the parent document.
    pub sequence_index: usize,
    /// Coarse topic tag derived from the document path.
    #[serde(default)]
    pub category: String,
}

/// One ranked hit from the index. Lives for the duration of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Cosine similarity in [-1, 1]; higher is better.
    pub score: f32,
    /// Build-time insertion position, used as the tie-break.
    pub position: usize,
}

/// A deduplicated source reference. Indices start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRef {
    pub index: usize,
    pub url: String,
}

/// What the chat layer receives for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub context: String,
    pub citations: Vec<CitationRef>,
    /// False when retrieval is degraded; the caller should answer without context.
    pub available: bool,
}

impl SearchResponse {
    pub fn unavailable() -> Self {
        Self {
            context: String::new(),
            citations: Vec::new(),
            available: false,
        }
    }

    /// True when retrieval ran but nothing cleared the similarity threshold.
    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.citations.is_empty()
    }
}
