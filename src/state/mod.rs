use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::config::{AppPaths, ConfigService};
use crate::rag::RetrievalService;

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
///
/// Contains references to:
/// - Configuration and paths
/// - The retrieval service, which owns the active index
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub retrieval: Arc<RetrievalService>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// This process includes:
    /// 1. Loading configuration, including the retrieval start profile
    /// 2. Loading the persisted index, or building it from the corpus when
    ///    the profile allows
    ///
    /// A degraded (unavailable) retrieval service is not an error here; a
    /// corrupt index on disk is.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let retrieval_config = config
            .retrieval_config()
            .map_err(|e| InitializationError::Config(e.into()))?;

        tracing::info!(
            "Starting retrieval ({:?}): corpus {}, index {}",
            retrieval_config.profile,
            retrieval_config.docs_dir.display(),
            retrieval_config.index_path.display()
        );

        // Index builds are CPU-bound; keep them off the async workers.
        let retrieval = tokio::task::spawn_blocking(move || {
            let service = RetrievalService::new(retrieval_config);
            let profile = service.config().profile;
            service.start(profile).map(|_| service)
        })
        .await
        .map_err(|e| InitializationError::Retrieval(e.into()))?
        .map_err(|e| InitializationError::Retrieval(e.into()))?;

        Ok(Self::from_parts(paths, config, Arc::new(retrieval)))
    }

    pub fn from_parts(
        paths: Arc<AppPaths>,
        config: ConfigService,
        retrieval: Arc<RetrievalService>,
    ) -> Arc<Self> {
        Arc::new(AppState {
            paths,
            config,
            retrieval,
            started_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{ServiceState, StartProfile};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn initialize_builds_index_from_project_docs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(
            root.join("docs/overview.md"),
            "# Overview\n\nNextflow is a workflow system for data-driven computational pipelines.",
        )
        .unwrap();
        fs::write(
            root.join("config.yml"),
            "vector_store:\n  chunk_min_chars: 20\n",
        )
        .unwrap();

        let paths = Arc::new(AppPaths::with_dirs(root.clone(), root.join("data")));
        let state = AppState::initialize(paths).await.unwrap();

        assert!(state.retrieval.is_ready());
        assert_eq!(state.retrieval.status().vector_count, 1);
    }

    #[tokio::test]
    async fn invalid_config_fails_initialization() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("config.yml"), "vector_store:\n  search_top_k: many\n").unwrap();

        let paths = Arc::new(AppPaths::with_dirs(root.clone(), root.join("data")));
        let result = AppState::initialize(paths).await;
        assert!(matches!(result, Err(InitializationError::Config(_))));
    }

    #[tokio::test]
    async fn query_profile_from_config_never_builds() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(
            root.join("docs/overview.md"),
            "# Overview\n\nNextflow is a workflow system for data-driven computational pipelines.",
        )
        .unwrap();
        fs::write(
            root.join("config.yml"),
            "vector_store:\n  chunk_min_chars: 20\n  profile: query\n",
        )
        .unwrap();

        let paths = Arc::new(AppPaths::with_dirs(root.clone(), root.join("data")));
        let state = AppState::initialize(paths).await.unwrap();

        assert_eq!(state.retrieval.config().profile, StartProfile::QueryOnly);
        assert_eq!(state.retrieval.state(), ServiceState::Unavailable);
        assert!(!root.join("data/docs.index").exists());
    }
}
