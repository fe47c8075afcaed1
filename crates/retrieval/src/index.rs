//! Vector index abstraction
//!
//! The index is an external shared resource accessed read-only by the
//! answer loop; writes happen during ingestion, which lives outside this
//! core. Scores follow one convention everywhere: normalized to [0, 1],
//! higher = more relevant. Implementations backed by engines with other
//! conventions must normalize before returning hits.

use anchor_common::errors::Result;
use async_trait::async_trait;
use std::sync::RwLock;

use crate::mmr::cosine_similarity;

/// One raw hit from the index
#[derive(Debug, Clone)]
pub struct IndexHit {
    /// Chunk identifier, stable across requests
    pub chunk_id: String,

    /// Source document identifier
    pub source: String,

    /// Chunk text content
    pub content: String,

    /// Normalized relevance score, higher = more relevant
    pub score: f32,

    /// Chunk embedding, when the backend can return it cheaply.
    /// MMR re-ranking uses this; absent embeddings are re-derived.
    pub embedding: Option<Vec<f32>>,
}

/// Metadata filter applied at query time
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    /// Restrict hits to one source document
    pub source: Option<String>,
}

impl IndexFilter {
    fn matches(&self, hit_source: &str) -> bool {
        match &self.source {
            Some(source) => source == hit_source,
            None => true,
        }
    }
}

/// Contract for vector index clients.
///
/// Concurrent reads are safe to whatever extent the underlying client
/// guarantees; this core adds no locking of its own.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return the k nearest chunks to the query embedding, scores
    /// non-increasing along the result order.
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<IndexHit>>;

    /// Whether the index holds any data yet
    fn is_ready(&self) -> bool;

    /// Number of chunks currently indexed
    fn doc_count(&self) -> usize;
}

/// One stored chunk in the in-memory index
#[derive(Debug, Clone)]
struct StoredChunk {
    chunk_id: String,
    source: String,
    content: String,
    embedding: Vec<f32>,
}

/// In-memory vector index.
///
/// Reference implementation of the [`VectorIndex`] seam: a brute-force
/// cosine scan. Serves tests and offline development; production deploys
/// swap in a real index client behind the same trait.
#[derive(Default)]
pub struct InMemoryIndex {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk. Ingestion-side write path, not used by the loop.
    pub fn add_chunk(
        &self,
        source: impl Into<String>,
        chunk_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) {
        self.chunks
            .write()
            .expect("index lock poisoned")
            .push(StoredChunk {
                chunk_id: chunk_id.into(),
                source: source.into(),
                content: content.into(),
                embedding,
            });
    }

    /// Chunks currently stored for one source document
    pub fn source_count(&self, source: &str) -> usize {
        self.chunks
            .read()
            .expect("index lock poisoned")
            .iter()
            .filter(|c| c.source == source)
            .count()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<IndexHit>> {
        let chunks = self.chunks.read().expect("index lock poisoned");

        let mut hits: Vec<IndexHit> = chunks
            .iter()
            .filter(|c| filter.map_or(true, |f| f.matches(&c.source)))
            .map(|c| IndexHit {
                chunk_id: c.chunk_id.clone(),
                source: c.source.clone(),
                content: c.content.clone(),
                // Clamp: negative cosine carries no relevance signal here
                score: cosine_similarity(embedding, &c.embedding).max(0.0),
                embedding: Some(c.embedding.clone()),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn is_ready(&self) -> bool {
        !self.chunks.read().expect("index lock poisoned").is_empty()
    }

    fn doc_count(&self) -> usize {
        self.chunks.read().expect("index lock poisoned").len()
    }
}
