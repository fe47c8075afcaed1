//! Evidence types accumulated by the answer loop

use anchor_common::types::{truncate, SourceInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Snippet length used when presenting evidence to callers
const SNIPPET_LEN: usize = 300;

/// One retrieved passage. Immutable once produced by the retriever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    /// Source document identifier
    pub source: String,

    /// Chunk identifier within the source
    pub chunk_id: String,

    /// Passage text
    pub content: String,

    /// Normalized relevance score, higher = more relevant
    pub score: f32,

    /// Rank position in its retrieval result list (1-based)
    pub rank: usize,
}

impl EvidenceItem {
    /// Presentation form with a truncated snippet
    pub fn to_source_info(&self) -> SourceInfo {
        SourceInfo {
            source: self.source.clone(),
            chunk_id: self.chunk_id.clone(),
            snippet: truncate(&self.content, SNIPPET_LEN),
            score: self.score,
            rank: self.rank,
        }
    }
}

/// Ordered evidence accumulated across retrieval rounds.
///
/// Only grows within a request. Earlier rounds' evidence stays visible to
/// later critique; duplicates are collapsed only at finalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceSet {
    items: Vec<EvidenceItem>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one round's results, keeping earlier evidence
    pub fn extend(&mut self, items: Vec<EvidenceItem>) {
        self.items.extend(items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.iter()
    }

    /// Highest score across all evidence; 0.0 when empty
    pub fn max_score(&self) -> f32 {
        self.items.iter().map(|i| i.score).fold(0.0, f32::max)
    }

    /// Count of items at or above the threshold
    pub fn count_at_least(&self, min_score: f32) -> usize {
        self.items.iter().filter(|i| i.score >= min_score).count()
    }

    /// First `n` items, accumulation order
    pub fn top(&self, n: usize) -> &[EvidenceItem] {
        &self.items[..n.min(self.items.len())]
    }

    /// Finalization-time view: deduplicated by `(source, chunk_id)`,
    /// first-seen order preserved.
    pub fn dedup_sources(&self) -> Vec<SourceInfo> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        self.items
            .iter()
            .filter(|item| seen.insert((item.source.clone(), item.chunk_id.clone())))
            .map(EvidenceItem::to_source_info)
            .collect()
    }
}
