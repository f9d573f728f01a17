use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{health, retrieval};
use crate::state::AppState;

/// Creates the application router with all routes and middleware.
///
/// This function sets up:
/// - CORS middleware
/// - Health check endpoint
/// - Retrieval endpoints (status, search, rebuild)
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/retrieval/status", get(retrieval::get_status))
        .route("/api/retrieval/search", post(retrieval::search))
        .route("/api/retrieval/rebuild", post(retrieval::rebuild))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let config = match state.config.load_config() {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                "Failed to load config while building CORS layer: {}; using local defaults",
                err
            );
            Value::Null
        }
    };
    let allowed_origins = resolve_allowed_origins(&config)
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

fn resolve_allowed_origins(config: &Value) -> Vec<String> {
    let origins = config
        .get("server")
        .and_then(|v| v.get("cors_allowed_origins"))
        .and_then(|value| value.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|item| item.as_str())
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if origins.is_empty() {
        return default_local_origins();
    }

    origins
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
        "http://127.0.0.1:8000".to_string(),
    ]
}
