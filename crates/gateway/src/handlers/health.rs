//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub index: IndexStatus,
}

#[derive(Serialize)]
pub struct IndexStatus {
    pub ready: bool,
    pub chunks: usize,
}

/// Liveness plus index readiness
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: anchor_common::VERSION.to_string(),
        index: IndexStatus {
            ready: state.retriever.is_ready(),
            chunks: state.retriever.doc_count(),
        },
    })
}
