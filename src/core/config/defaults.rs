use serde_json::{json, Value};

pub const DOCS_DIR: &str = "docs";
pub const INDEX_PATH: &str = "data/docs.index";
pub const DOCS_BASE_URL: &str = "https://www.nextflow.io/docs/latest";

pub const SEARCH_TOP_K: usize = 5;
pub const SEARCH_THRESHOLD: f32 = 0.4;
pub const CONTEXT_MAX_CHARS: usize = 4000;

// ~50-400 tokens at four characters per token.
pub const CHUNK_MIN_CHARS: usize = 200;
pub const CHUNK_MAX_CHARS: usize = 1600;
pub const MIN_DOCUMENT_CHARS: usize = 50;

/// `build` may index the corpus at startup; `query` only loads a prebuilt index.
pub const RETRIEVAL_PROFILE: &str = "build";

pub const EMBEDDING_MODEL: &str = "hashing";
pub const EMBEDDING_DIMENSION: usize = 384;
pub const EMBEDDING_BATCH_SIZE: usize = 16;
pub const EMBEDDING_THREADS: usize = 1;

pub const EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];
pub const EXCLUDE_DIRS: [&str; 4] = ["_static", "_templates", "snippets", "diagrams"];
pub const EXCLUDE_FILES: [&str; 6] = [
    "README.md",
    "LICENCE.txt",
    "conf.py",
    "Makefile",
    "Dockerfile",
    "netlify.toml",
];

pub const DEFAULT_CITATIONS: [&str; 3] = [
    "https://www.nextflow.io/docs/latest/",
    "https://www.nextflow.io/docs/latest/dsl2.html",
    "https://github.com/nextflow-io/nextflow",
];

/// Full default configuration document, in the same shape as `config.yml`.
pub fn generate_default_config() -> Value {
    json!({
        "vector_store": {
            "docs_dir": DOCS_DIR,
            "index_path": INDEX_PATH,
            "docs_base_url": DOCS_BASE_URL,
            "search_top_k": SEARCH_TOP_K,
            "search_threshold": SEARCH_THRESHOLD,
            "context_max_chars": CONTEXT_MAX_CHARS,
            "chunk_min_chars": CHUNK_MIN_CHARS,
            "chunk_max_chars": CHUNK_MAX_CHARS,
            "min_document_chars": MIN_DOCUMENT_CHARS,
            "extensions": EXTENSIONS,
            "exclude_dirs": EXCLUDE_DIRS,
            "exclude_files": EXCLUDE_FILES,
            "rebuild_when_stale": true,
            "force_rebuild": false,
            "profile": RETRIEVAL_PROFILE
        },
        "embedding": {
            "model": EMBEDDING_MODEL,
            "dimension": EMBEDDING_DIMENSION,
            "batch_size": EMBEDDING_BATCH_SIZE,
            "threads": EMBEDDING_THREADS
        },
        "default_citations": DEFAULT_CITATIONS
    })
}
