use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "retrieval": state.retrieval.status(),
        "default_citations": state.retrieval.default_citations(),
    }))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let retrieval = state.retrieval.clone();
    let response = tokio::task::spawn_blocking(move || retrieval.search(&payload.query))
        .await
        .map_err(ApiError::internal)??;

    Ok(Json(response))
}

pub async fn rebuild(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Index rebuild requested over HTTP");
    let retrieval = state.retrieval.clone();
    let status = tokio::task::spawn_blocking(move || retrieval.rebuild())
        .await
        .map_err(ApiError::internal)??;

    Ok(Json(status))
}
