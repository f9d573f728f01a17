use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use super::defaults;
use super::paths::AppPaths;
use crate::embedding::EmbeddingSettings;
use crate::rag::{ChunkSettings, LoaderSettings, StartProfile};

/// Typed retrieval configuration, resolved from `config.yml` plus environment.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalConfig {
    pub docs_dir: PathBuf,
    /// Base path of the persisted index; the `.index`/`.data` pair sits next to it.
    pub index_path: PathBuf,
    pub loader: LoaderSettings,
    pub embedding: EmbeddingSettings,
    pub top_k: usize,
    pub min_score: f32,
    pub context_max_chars: usize,
    pub rebuild_when_stale: bool,
    pub force_rebuild: bool,
    /// Whether startup may build the index or only load a prebuilt one.
    pub profile: StartProfile,
    pub default_citations: Vec<String>,
}

impl RetrievalConfig {
    /// Defaults with paths anchored at `root`.
    pub fn with_root(root: &std::path::Path) -> Self {
        Self {
            docs_dir: root.join(defaults::DOCS_DIR),
            index_path: root.join(defaults::INDEX_PATH),
            loader: LoaderSettings::default(),
            embedding: EmbeddingSettings::default(),
            top_k: defaults::SEARCH_TOP_K,
            min_score: defaults::SEARCH_THRESHOLD,
            context_max_chars: defaults::CONTEXT_MAX_CHARS,
            rebuild_when_stale: true,
            force_rebuild: false,
            profile: StartProfile::BuildCapable,
            default_citations: defaults::DEFAULT_CITATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Reads the `vector_store`, `embedding` and `default_citations` sections.
    /// Missing keys keep their defaults; the value is expected to be validated.
    pub fn from_value(config: &Value, paths: &AppPaths) -> Self {
        let mut resolved = Self::with_root(&paths.project_root);
        let store = config.get("vector_store");
        let embedding = config.get("embedding");

        if let Some(dir) = str_field(store, "docs_dir") {
            resolved.docs_dir = paths.resolve(dir);
        }
        if let Some(path) = str_field(store, "index_path") {
            resolved.index_path = paths.resolve(path);
        }
        if let Some(base_url) = str_field(store, "docs_base_url") {
            resolved.loader.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(top_k) = u64_field(store, "search_top_k") {
            resolved.top_k = top_k.clamp(1, 50) as usize;
        }
        if let Some(threshold) = f64_field(store, "search_threshold").filter(|v| v.is_finite())
        {
            resolved.min_score = threshold.clamp(-1.0, 1.0) as f32;
        }
        if let Some(budget) = u64_field(store, "context_max_chars") {
            resolved.context_max_chars = budget.max(1) as usize;
        }
        if let Some(min) = u64_field(store, "chunk_min_chars") {
            resolved.loader.chunking.min_chars = min as usize;
        }
        if let Some(max) = u64_field(store, "chunk_max_chars") {
            resolved.loader.chunking.max_chars = max.max(1) as usize;
        }
        if let Some(min_doc) = u64_field(store, "min_document_chars") {
            resolved.loader.min_document_chars = min_doc as usize;
        }
        if let Some(extensions) = string_list(store, "extensions") {
            resolved.loader.extensions = extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect();
        }
        if let Some(dirs) = string_list(store, "exclude_dirs") {
            resolved.loader.exclude_dirs = dirs;
        }
        if let Some(files) = string_list(store, "exclude_files") {
            resolved.loader.exclude_files = files;
        }
        if let Some(flag) = bool_field(store, "rebuild_when_stale") {
            resolved.rebuild_when_stale = flag;
        }
        if let Some(flag) = bool_field(store, "force_rebuild") {
            resolved.force_rebuild = flag;
        }
        if let Some(profile) = str_field(store, "profile").and_then(StartProfile::parse) {
            resolved.profile = profile;
        }

        if let Some(model) = str_field(embedding, "model") {
            resolved.embedding.model = model.to_string();
        }
        if let Some(dimension) = u64_field(embedding, "dimension") {
            resolved.embedding.dimension = dimension.max(1) as usize;
        }
        if let Some(path) = str_field(embedding, "model_path") {
            resolved.embedding.model_path = Some(paths.resolve(path));
        }
        if let Some(path) = str_field(embedding, "tokenizer_path") {
            resolved.embedding.tokenizer_path = Some(paths.resolve(path));
        }
        if let Some(batch) = u64_field(embedding, "batch_size") {
            resolved.embedding.batch_size = batch.max(1) as usize;
        }
        if let Some(threads) = u64_field(embedding, "threads") {
            resolved.embedding.threads = threads.max(1) as usize;
        }

        if let Some(citations) = string_list(Some(config), "default_citations") {
            resolved.default_citations = citations;
        }

        resolved
    }

    /// Applies environment overrides; env values win over YAML.
    pub fn apply_overrides<F>(&mut self, paths: &AppPaths, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = get("DOCS_DIR") {
            self.docs_dir = paths.resolve(&dir);
        }
        if let Some(path) = get("VECTOR_INDEX_PATH") {
            self.index_path = paths.resolve(&path);
        }
        if let Some(top_k) = get("VECTOR_SEARCH_TOP_K").and_then(|v| v.parse::<usize>().ok()) {
            self.top_k = top_k.clamp(1, 50);
        }
        if let Some(raw) = get("VECTOR_SEARCH_THRESHOLD") {
            match raw.parse::<f32>() {
                Ok(threshold) if threshold.is_finite() => {
                    self.min_score = threshold.clamp(-1.0, 1.0);
                }
                _ => tracing::warn!(
                    "Ignoring VECTOR_SEARCH_THRESHOLD={:?}; keeping {}",
                    raw,
                    self.min_score
                ),
            }
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(threads) = get("EMBED_NUM_THREADS").and_then(|v| v.parse::<usize>().ok()) {
            self.embedding.threads = threads.max(1);
        }
        if let Some(batch) = get("EMBED_BATCH_SIZE").and_then(|v| v.parse::<usize>().ok()) {
            self.embedding.batch_size = batch.max(1);
        }
        if let Some(raw) = get("RETRIEVAL_PROFILE") {
            match StartProfile::parse(&raw) {
                Some(profile) => self.profile = profile,
                None => tracing::warn!(
                    "Ignoring RETRIEVAL_PROFILE={:?}; expected one of {:?}",
                    raw,
                    StartProfile::NAMES
                ),
            }
        }
        if let Some(flag) = get("BUILD_INDEX") {
            self.force_rebuild = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }
}

fn str_field<'a>(section: Option<&'a Value>, key: &str) -> Option<&'a str> {
    section
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn u64_field(section: Option<&Value>, key: &str) -> Option<u64> {
    section.and_then(|v| v.get(key)).and_then(|v| v.as_u64())
}

fn f64_field(section: Option<&Value>, key: &str) -> Option<f64> {
    section.and_then(|v| v.get(key)).and_then(|v| v.as_f64())
}

fn bool_field(section: Option<&Value>, key: &str) -> Option<bool> {
    section.and_then(|v| v.get(key)).and_then(|v| v.as_bool())
}

fn string_list(section: Option<&Value>, key: &str) -> Option<Vec<String>> {
    section.and_then(|v| v.get(key)).and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}
