//! Ingestion handler for pre-chunked passages
//!
//! Chunking itself happens upstream; this endpoint only embeds and
//! indexes the chunks it is given.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use anchor_common::errors::{AppError, Result};
use anchor_retrieval::VectorIndex;

/// Ingest request body
#[derive(Debug, Deserialize, Validate)]
pub struct IngestBody {
    /// Source document identifier
    #[validate(length(min = 1, max = 255))]
    pub source: String,

    /// Pre-chunked passage texts, in document order
    #[validate(length(min = 1, max = 500))]
    pub chunks: Vec<String>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub source: String,
    pub chunks_indexed: usize,
    pub total_chunks: usize,
}

/// Embed and index a document's chunks
pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestResponse>> {
    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    // Ids number per source, so an ingest of one document in parts
    // continues where the previous part stopped
    let offset = state.index.source_count(&body.source);

    let mut indexed = 0;
    for chunk in &body.chunks {
        if chunk.trim().is_empty() {
            continue;
        }
        let embedding = state.embedder.embed(chunk).await?;
        state.index.add_chunk(
            &body.source,
            format!("{}-{}", body.source, offset + indexed),
            chunk,
            embedding,
        );
        indexed += 1;
    }

    tracing::info!(
        source = %body.source,
        chunks = indexed,
        total = state.index.doc_count(),
        "Document ingested"
    );

    Ok(Json(IngestResponse {
        source: body.source,
        chunks_indexed: indexed,
        total_chunks: state.index.doc_count(),
    }))
}
