use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::context_builder::ContextAssembler;
use super::error::RetrievalError;
use super::index::{BuildOptions, VectorIndex};
use super::loader::{corpus_fingerprint, scan_corpus};
use super::persist::{self, IndexPaths};
use super::types::SearchResponse;
use crate::core::config::RetrievalConfig;
use crate::embedding::{create_embedder, Embedder, EmbeddingError};

const WARMUP_TEXT: &str = "warm up retrieval embedder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Uninitialized,
    Ready,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrigin {
    Loaded,
    Built,
}

/// How the service may obtain its index at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartProfile {
    /// Load a persisted index, building (or refreshing) it from the corpus when needed.
    #[serde(rename = "build")]
    BuildCapable,
    /// Only load a prebuilt index; never read the corpus.
    #[serde(rename = "query")]
    QueryOnly,
}

impl StartProfile {
    /// Accepted spellings of `vector_store.profile` and `RETRIEVAL_PROFILE`.
    pub const NAMES: [&'static str; 4] = ["build", "build_capable", "query", "query_only"];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "build" | "build_capable" => Some(StartProfile::BuildCapable),
            "query" | "query_only" => Some(StartProfile::QueryOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStatus {
    pub state: ServiceState,
    pub origin: Option<IndexOrigin>,
    pub vector_count: usize,
    pub dimension: usize,
    pub model_id: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
    pub index_path: String,
    /// Why retrieval is unavailable, when it is.
    pub reason: Option<String>,
}

struct ServiceInner {
    state: ServiceState,
    index: Option<Arc<VectorIndex>>,
    origin: Option<IndexOrigin>,
    reason: Option<String>,
}

/// Owns the embedder and the active index, and answers retrieval queries.
///
/// The index is read-only once published. `rebuild` builds a replacement on
/// the side and swaps the `Arc`, so in-flight searches keep the old one.
pub struct RetrievalService {
    config: RetrievalConfig,
    assembler: ContextAssembler,
    embedder: OnceLock<Arc<dyn Embedder>>,
    inner: RwLock<ServiceInner>,
    rebuild_lock: Mutex<()>,
}

impl RetrievalService {
    /// Uninitialized service; the embedder is created on `start`.
    pub fn new(config: RetrievalConfig) -> Self {
        let assembler = ContextAssembler::new(config.context_max_chars);
        Self {
            config,
            assembler,
            embedder: OnceLock::new(),
            inner: RwLock::new(ServiceInner {
                state: ServiceState::Uninitialized,
                index: None,
                origin: None,
                reason: None,
            }),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Uninitialized service with a caller-supplied embedder.
    pub fn with_embedder(config: RetrievalConfig, embedder: Arc<dyn Embedder>) -> Self {
        let service = Self::new(config);
        let _ = service.embedder.set(embedder);
        service
    }

    /// Build-capable startup: load, or build and save, the index.
    pub fn initialize(config: RetrievalConfig) -> Result<Self, RetrievalError> {
        let service = Self::new(config);
        service.start(StartProfile::BuildCapable)?;
        Ok(service)
    }

    /// Query-only startup: a missing prebuilt index leaves retrieval unavailable.
    pub fn open_prebuilt(config: RetrievalConfig) -> Result<Self, RetrievalError> {
        let service = Self::new(config);
        service.start(StartProfile::QueryOnly)?;
        Ok(service)
    }

    /// Drive the Uninitialized state to Ready or Unavailable.
    ///
    /// Returns `Err` only for fatal problems: a corrupt or mismatched index on
    /// disk, or an I/O failure while saving a fresh build. Deployment problems
    /// (no corpus, empty corpus, missing model) end in Unavailable instead.
    pub fn start(&self, profile: StartProfile) -> Result<(), RetrievalError> {
        if self.state() != ServiceState::Uninitialized {
            tracing::debug!("Retrieval service already started");
            return Ok(());
        }

        let embedder = match self.embedder() {
            Ok(embedder) => embedder,
            Err(err) => {
                self.mark_unavailable(&err);
                return Ok(());
            }
        };

        match self.open_index(profile, embedder.as_ref()) {
            Ok((index, origin)) => {
                self.publish(index, origin);
                self.warm_up(embedder.as_ref());
                Ok(())
            }
            Err(err) if err.is_configuration() => {
                self.mark_unavailable(&err);
                Ok(())
            }
            Err(err) => {
                tracing::error!("Retrieval index failed to open: {}", err);
                Err(err)
            }
        }
    }

    fn open_index(
        &self,
        profile: StartProfile,
        embedder: &dyn Embedder,
    ) -> Result<(VectorIndex, IndexOrigin), RetrievalError> {
        let base = self.config.index_path.as_path();
        let paths = IndexPaths::for_base(base);

        if self.config.force_rebuild && profile == StartProfile::BuildCapable {
            tracing::info!("Forced rebuild requested; ignoring any index at {}", base.display());
            return Ok((self.build_and_save(embedder)?, IndexOrigin::Built));
        }

        if !paths.any_exists() {
            return match profile {
                StartProfile::QueryOnly => Err(RetrievalError::Config(format!(
                    "no prebuilt index at {}",
                    paths.vectors.display()
                ))),
                StartProfile::BuildCapable => {
                    tracing::info!("No index at {}; building from corpus", base.display());
                    Ok((self.build_and_save(embedder)?, IndexOrigin::Built))
                }
            };
        }

        let index = persist::load(base)?;
        index.ensure_compatible(embedder)?;

        if profile == StartProfile::BuildCapable && self.config.rebuild_when_stale {
            if let Some(fresh) = self.refresh_if_stale(&index, embedder) {
                return Ok((fresh, IndexOrigin::Built));
            }
        }
        Ok((index, IndexOrigin::Loaded))
    }

    /// A fresh index when the corpus no longer matches `index`. Failures keep the loaded index.
    fn refresh_if_stale(&self, index: &VectorIndex, embedder: &dyn Embedder) -> Option<VectorIndex> {
        let docs_dir = self.config.docs_dir.as_path();
        let current = match corpus_fingerprint(docs_dir, &self.config.loader) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                tracing::warn!("Cannot check index freshness: {}", err);
                return None;
            }
        };
        if current == index.corpus_fingerprint() {
            return None;
        }

        tracing::info!("Corpus under {} changed since the index was built; rebuilding", docs_dir.display());
        match self.build_and_save(embedder) {
            Ok(fresh) => Some(fresh),
            Err(err) => {
                tracing::warn!("Rebuild of stale index failed, serving the loaded one: {}", err);
                None
            }
        }
    }

    fn build_and_save(&self, embedder: &dyn Embedder) -> Result<VectorIndex, RetrievalError> {
        let index = self.build_index(embedder)?;
        persist::save(&index, &self.config.index_path)?;
        Ok(index)
    }

    fn build_index(&self, embedder: &dyn Embedder) -> Result<VectorIndex, RetrievalError> {
        let docs_dir = self.config.docs_dir.as_path();
        let corpus = scan_corpus(docs_dir, &self.config.loader)?;
        if corpus.chunks.is_empty() {
            return Err(RetrievalError::EmptyCorpus {
                root: docs_dir.to_path_buf(),
            });
        }

        let options = BuildOptions {
            batch_size: self.config.embedding.batch_size,
            threads: self.config.embedding.threads,
        };
        Ok(VectorIndex::build(corpus.chunks, embedder, options)?.with_fingerprint(corpus.fingerprint))
    }

    /// Answer one query: embed, rank, assemble.
    ///
    /// When retrieval is not Ready the response is empty with `available: false`.
    /// An empty query is a validation error; no match is an empty, available response.
    pub fn search(&self, query: &str) -> Result<SearchResponse, RetrievalError> {
        let Some(index) = self.active_index() else {
            return Ok(SearchResponse::unavailable());
        };
        let embedder = self.embedder()?;

        let vector = embedder.embed(query.trim())?;
        let results = index.query(&vector, self.config.top_k, self.config.min_score)?;
        let (context, citations) = self.assembler.assemble(&results);

        tracing::debug!(
            "Retrieval matched {} passages, {} citations, {} context chars",
            results.len(),
            citations.len(),
            context.chars().count()
        );

        Ok(SearchResponse {
            context,
            citations,
            available: true,
        })
    }

    /// Rebuild from the corpus, save, then swap the active index.
    ///
    /// The current index keeps serving until the swap and is untouched on failure.
    pub fn rebuild(&self) -> Result<RetrievalStatus, RetrievalError> {
        let _guard = self
            .rebuild_lock
            .try_lock()
            .map_err(|_| RetrievalError::Unavailable("a rebuild is already running".to_string()))?;
        let embedder = self.embedder()?;

        let index = self.build_and_save(embedder.as_ref())?;
        self.publish(index, IndexOrigin::Built);
        Ok(self.status())
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ServiceState::Ready
    }

    pub fn state(&self) -> ServiceState {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn status(&self) -> RetrievalStatus {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let index = inner.index.as_deref();
        RetrievalStatus {
            state: inner.state,
            origin: inner.origin,
            vector_count: index.map(VectorIndex::vector_count).unwrap_or(0),
            dimension: index.map(VectorIndex::dimension).unwrap_or(0),
            model_id: index.map(|i| i.model_id().to_string()),
            built_at: index.map(VectorIndex::built_at),
            index_path: self.config.index_path.display().to_string(),
            reason: inner.reason.clone(),
        }
    }

    /// Fallback URLs for answers that come without retrieved citations.
    pub fn default_citations(&self) -> &[String] {
        &self.config.default_citations
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn index_path(&self) -> &Path {
        &self.config.index_path
    }

    fn active_index(&self) -> Option<Arc<VectorIndex>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            ServiceState::Ready => inner.index.clone(),
            _ => None,
        }
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>, RetrievalError> {
        if let Some(embedder) = self.embedder.get() {
            return Ok(embedder.clone());
        }
        let created = create_embedder(&self.config.embedding)?;
        Ok(self.embedder.get_or_init(|| created).clone())
    }

    fn publish(&self, index: VectorIndex, origin: IndexOrigin) {
        tracing::info!(
            "Retrieval ready: {} vectors ({:?}, model {})",
            index.vector_count(),
            origin,
            index.model_id()
        );
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.state = ServiceState::Ready;
        inner.index = Some(Arc::new(index));
        inner.origin = Some(origin);
        inner.reason = None;
    }

    fn mark_unavailable(&self, err: &RetrievalError) {
        tracing::error!(
            "Retrieval unavailable, answering without document context: {}",
            err
        );
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.state = ServiceState::Unavailable;
        inner.index = None;
        inner.origin = None;
        inner.reason = Some(err.to_string());
    }

    fn warm_up(&self, embedder: &dyn Embedder) {
        match embedder.embed(WARMUP_TEXT) {
            Ok(_) => tracing::debug!("Embedder warm-up complete"),
            Err(EmbeddingError::EmptyInput) => {}
            Err(err) => tracing::warn!("Embedder warm-up failed: {}", err),
        }
    }
}
