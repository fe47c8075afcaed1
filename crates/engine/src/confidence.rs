//! Confidence policy over retrieval scores
//!
//! A pure function of evidence and policy: deterministic, independent of
//! any generation-backend output. It gates whether generation is even
//! attempted in the single-pass variant.

use anchor_common::config::RagConfig;
use anchor_common::types::ConfidenceLevel;
use anchor_retrieval::EvidenceSet;

/// Thresholds used to grade retrieval evidence
#[derive(Debug, Clone)]
pub struct ConfidencePolicy {
    /// Minimum relevance score for a passage to count as evidence
    pub min_score: f32,

    /// Minimum number of valid passages before answering directly
    pub min_sources: usize,

    /// Score threshold for HIGH confidence
    pub high_score: f32,

    /// Valid-source count threshold for HIGH confidence
    pub high_sources: usize,
}

impl ConfidencePolicy {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            min_score: config.min_score,
            min_sources: config.min_sources,
            high_score: config.high_score,
            high_sources: config.high_sources,
        }
    }

    /// Grade the evidence: `(level, needs_fallback)`.
    ///
    /// Empty evidence is LOW with fallback. Otherwise fallback triggers
    /// when the best score misses `min_score` or too few passages clear
    /// it; HIGH requires both `high_score` and `high_sources`.
    pub fn evaluate(&self, evidence: &EvidenceSet) -> (ConfidenceLevel, bool) {
        if evidence.is_empty() {
            return (ConfidenceLevel::Low, true);
        }

        let max_score = evidence.max_score();
        let valid_count = evidence.count_at_least(self.min_score);

        let needs_fallback = max_score < self.min_score || valid_count < self.min_sources;

        let level = if needs_fallback {
            ConfidenceLevel::Low
        } else if max_score >= self.high_score && valid_count >= self.high_sources {
            ConfidenceLevel::High
        } else {
            ConfidenceLevel::Medium
        };

        tracing::debug!(
            max_score,
            valid_count,
            min_score = self.min_score,
            min_sources = self.min_sources,
            level = ?level,
            needs_fallback,
            "Confidence evaluated"
        );

        (level, needs_fallback)
    }
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self::from_config(&RagConfig::default())
    }
}
