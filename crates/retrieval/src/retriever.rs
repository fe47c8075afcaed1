//! Evidence retriever
//!
//! Combines the embedding backend and the vector index into the two
//! retrieval strategies the answer loop uses: plain similarity top-k and
//! MMR re-ranking. Retrieval never fails the caller: a not-ready index or
//! a backend failure degrades to an empty result, which downstream steps
//! treat as a first-class case.

use anchor_common::config::RagConfig;
use anchor_common::embeddings::Embedder;
use anchor_common::errors::Result;
use anchor_common::types::RetrievalMode;
use std::sync::Arc;

use crate::evidence::EvidenceItem;
use crate::index::{IndexFilter, IndexHit, VectorIndex};
use crate::mmr::{mmr_select, MmrCandidate};

/// Score assigned when MMR re-derivation cannot produce one
const NEUTRAL_SCORE: f32 = 0.5;

/// Content prefix length used for score re-derivation lookups
const REDERIVE_PREFIX: usize = 200;

/// Per-call retrieval parameters
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Retrieval strategy
    pub mode: RetrievalMode,

    /// Number of passages to return
    pub k: usize,

    /// MMR candidate pool size; config default when absent
    pub fetch_k: Option<usize>,

    /// MMR diversity weight; config default when absent
    pub diversity_weight: Option<f32>,

    /// Metadata filter
    pub filter: Option<IndexFilter>,
}

impl RetrieveOptions {
    pub fn similarity(k: usize) -> Self {
        Self {
            mode: RetrievalMode::Similarity,
            k,
            fetch_k: None,
            diversity_weight: None,
            filter: None,
        }
    }

    pub fn mmr(k: usize) -> Self {
        Self {
            mode: RetrievalMode::Mmr,
            k,
            fetch_k: None,
            diversity_weight: None,
            filter: None,
        }
    }
}

/// Retriever over an embedding backend and a vector index. Read-only.
pub struct EvidenceRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RagConfig,
}

impl EvidenceRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, config: RagConfig) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Whether the underlying index holds any data
    pub fn is_ready(&self) -> bool {
        self.index.is_ready()
    }

    /// Number of chunks in the underlying index
    pub fn doc_count(&self) -> usize {
        self.index.doc_count()
    }

    /// Retrieve evidence for a query.
    ///
    /// Infallible by contract: backend failures are logged and degrade to
    /// an empty list.
    pub async fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Vec<EvidenceItem> {
        if !self.index.is_ready() {
            tracing::warn!("Vector index not ready, returning no evidence");
            return Vec::new();
        }

        match self.try_retrieve(query, options).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "Retrieval failed, degrading to empty evidence");
                Vec::new()
            }
        }
    }

    async fn try_retrieve(&self, query: &str, options: &RetrieveOptions) -> Result<Vec<EvidenceItem>> {
        let query_embedding = self.embedder.embed(query).await?;

        let hits = match options.mode {
            RetrievalMode::Similarity => {
                self.index
                    .search(&query_embedding, options.k, options.filter.as_ref())
                    .await?
            }
            RetrievalMode::Mmr => self.retrieve_mmr(&query_embedding, options).await?,
        };

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| EvidenceItem {
                source: hit.source,
                chunk_id: hit.chunk_id,
                content: hit.content,
                score: hit.score,
                rank: i + 1,
            })
            .collect())
    }

    /// MMR: over-fetch candidates, greedily re-rank for diversity, then
    /// re-derive a relevance score per selected item.
    async fn retrieve_mmr(
        &self,
        query_embedding: &[f32],
        options: &RetrieveOptions,
    ) -> Result<Vec<IndexHit>> {
        let fetch_k = options.fetch_k.unwrap_or(self.config.fetch_k).max(options.k);
        let lambda = options
            .diversity_weight
            .unwrap_or(self.config.mmr_lambda)
            .clamp(0.0, 1.0);

        let fetched = self
            .index
            .search(query_embedding, fetch_k, options.filter.as_ref())
            .await?;

        if fetched.len() <= options.k {
            return Ok(fetched);
        }

        let mut candidates = Vec::with_capacity(fetched.len());
        for hit in &fetched {
            let embedding = match &hit.embedding {
                Some(e) => e.clone(),
                // Backend did not return the stored vector; re-embed the
                // passage text so the diversity term still has something
                // to work with.
                None => self.embedder.embed(&hit.content).await.unwrap_or_default(),
            };
            candidates.push(MmrCandidate {
                relevance: hit.score,
                embedding,
            });
        }

        let picked = mmr_select(&candidates, options.k, lambda);
        let mut selected: Vec<IndexHit> = picked.into_iter().map(|i| fetched[i].clone()).collect();

        for hit in &mut selected {
            hit.score = self.rederive_score(hit, options.filter.as_ref()).await;
        }

        Ok(selected)
    }

    /// Heuristic score re-derivation: look the selected passage back up by
    /// its own content prefix and take the top similarity score. This is
    /// an approximation, not an authoritative MMR relevance; failures get
    /// a neutral default rather than failing the call.
    async fn rederive_score(&self, hit: &IndexHit, filter: Option<&IndexFilter>) -> f32 {
        let prefix: String = hit.content.chars().take(REDERIVE_PREFIX).collect();

        let embedding = match self.embedder.embed(&prefix).await {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, chunk_id = %hit.chunk_id, "Score re-derivation embed failed");
                return NEUTRAL_SCORE;
            }
        };

        match self.index.search(&embedding, 1, filter).await {
            Ok(hits) => hits.first().map(|h| h.score).unwrap_or(NEUTRAL_SCORE),
            Err(e) => {
                tracing::debug!(error = %e, chunk_id = %hit.chunk_id, "Score re-derivation lookup failed");
                NEUTRAL_SCORE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use anchor_common::embeddings::MockEmbedder;

    const DIM: usize = 256;

    async fn seeded_index(embedder: &MockEmbedder, docs: &[(&str, &str, &str)]) -> InMemoryIndex {
        let index = InMemoryIndex::new();
        for (source, chunk_id, content) in docs {
            let embedding = embedder.embed(content).await.unwrap();
            index.add_chunk(*source, *chunk_id, *content, embedding);
        }
        index
    }

    fn retriever(embedder: MockEmbedder, index: InMemoryIndex) -> EvidenceRetriever {
        EvidenceRetriever::new(Arc::new(embedder), Arc::new(index), RagConfig::default())
    }

    #[tokio::test]
    async fn test_not_ready_index_yields_empty_not_error() {
        let r = retriever(MockEmbedder::new(DIM), InMemoryIndex::new());
        let items = r
            .retrieve("anything", &RetrieveOptions::similarity(5))
            .await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_scores_non_increasing_with_ranks() {
        let embedder = MockEmbedder::new(DIM);
        let index = seeded_index(
            &embedder,
            &[
                ("leave.md", "leave-0", "vacation leave policy for employees"),
                ("leave.md", "leave-1", "sick leave rules"),
                ("expense.md", "exp-0", "travel expense reimbursement process"),
            ],
        )
        .await;

        let r = retriever(MockEmbedder::new(DIM), index);
        let items = r
            .retrieve("vacation leave policy", &RetrieveOptions::similarity(3))
            .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].chunk_id, "leave-0");
        for pair in items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(items[0].rank, 1);
        assert_eq!(items[2].rank, 3);
    }

    #[tokio::test]
    async fn test_mmr_full_relevance_matches_similarity_baseline() {
        let docs = [
            ("a.md", "a-0", "database index tuning guide"),
            ("a.md", "a-1", "database index tuning guide continued"),
            ("b.md", "b-0", "holiday schedule for the office"),
            ("c.md", "c-0", "database backup procedures"),
            ("d.md", "d-0", "printer setup instructions"),
        ];

        let embedder = MockEmbedder::new(DIM);
        let index = seeded_index(&embedder, &docs).await;
        let r = retriever(MockEmbedder::new(DIM), index);

        let baseline = r
            .retrieve("database index tuning", &RetrieveOptions::similarity(3))
            .await;

        let mut options = RetrieveOptions::mmr(3);
        options.diversity_weight = Some(1.0);
        options.fetch_k = Some(5);
        let pure_relevance = r.retrieve("database index tuning", &options).await;

        let baseline_ids: Vec<&str> = baseline.iter().map(|i| i.chunk_id.as_str()).collect();
        let mmr_ids: Vec<&str> = pure_relevance.iter().map(|i| i.chunk_id.as_str()).collect();
        assert_eq!(baseline_ids, mmr_ids);
    }

    #[tokio::test]
    async fn test_mmr_zero_weight_diversifies() {
        // Two near-duplicate top hits; pure diversity must not take both
        let docs = [
            ("a.md", "a-0", "database index tuning guide"),
            ("a.md", "a-1", "database index tuning guide"),
            ("b.md", "b-0", "holiday schedule for the office"),
            ("c.md", "c-0", "printer setup instructions"),
        ];

        let embedder = MockEmbedder::new(DIM);
        let index = seeded_index(&embedder, &docs).await;
        let r = retriever(MockEmbedder::new(DIM), index);

        let mut options = RetrieveOptions::mmr(2);
        options.diversity_weight = Some(0.0);
        options.fetch_k = Some(4);
        let items = r.retrieve("database index tuning", &options).await;

        assert_eq!(items.len(), 2);
        let ids: Vec<&str> = items.iter().map(|i| i.chunk_id.as_str()).collect();
        assert!(!(ids.contains(&"a-0") && ids.contains(&"a-1")));
    }

    #[tokio::test]
    async fn test_mmr_rederived_scores_present() {
        let docs = [
            ("a.md", "a-0", "database index tuning guide"),
            ("b.md", "b-0", "holiday schedule for the office"),
            ("c.md", "c-0", "printer setup instructions"),
        ];

        let embedder = MockEmbedder::new(DIM);
        let index = seeded_index(&embedder, &docs).await;
        let r = retriever(MockEmbedder::new(DIM), index);

        let mut options = RetrieveOptions::mmr(2);
        options.fetch_k = Some(3);
        // fetch <= k short-circuits re-ranking, so over-fetch is forced
        let items = r.retrieve("database tuning", &options).await;
        assert_eq!(items.len(), 2);
        for item in &items {
            assert!(item.score > 0.0 && item.score <= 1.0);
        }
    }
}
