//! Loop state threaded through the answer state machine

use anchor_common::types::TraceEntry;
use anchor_retrieval::EvidenceSet;

use crate::critique::CritiqueResult;
use crate::drafter::Draft;

/// The query under answer: the original text never changes, the current
/// retrieval text may be rewritten between rounds.
#[derive(Debug, Clone)]
pub struct Query {
    pub original: String,
    pub current: String,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        let original = text.into();
        Self {
            current: original.clone(),
            original,
        }
    }

    /// Rewrite the retrieval text for the next round. An empty rewrite
    /// falls back to the original question.
    pub fn refine(&mut self, refined: Option<String>) {
        self.current = match refined {
            Some(q) if !q.trim().is_empty() => q,
            _ => self.original.clone(),
        };
    }
}

/// Loop phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retrieve,
    Draft,
    Critique,
    Refine,
    Finalize,
}

/// Mutable state carried across one request's rounds
#[derive(Debug)]
pub struct LoopState {
    pub query: Query,
    pub round: u32,
    pub evidence: EvidenceSet,
    pub draft: Option<Draft>,
    pub critique: Option<CritiqueResult>,
    pub trace: Vec<TraceEntry>,
}

impl LoopState {
    pub fn new(question: &str) -> Self {
        Self {
            query: Query::new(question),
            round: 0,
            evidence: EvidenceSet::new(),
            draft: None,
            critique: None,
            trace: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: TraceEntry) {
        self.trace.push(entry);
    }

    /// Retrieval passes performed so far; never below 1 once the loop ran
    pub fn loops_used(&self) -> u32 {
        self.round + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refine_replaces_current_only() {
        let mut query = Query::new("original question");
        query.refine(Some("sharper question".to_string()));
        assert_eq!(query.original, "original question");
        assert_eq!(query.current, "sharper question");
    }

    #[test]
    fn test_refine_without_rewrite_restores_original() {
        let mut query = Query::new("original question");
        query.refine(Some("sharper question".to_string()));
        query.refine(None);
        assert_eq!(query.current, "original question");

        query.refine(Some("   ".to_string()));
        assert_eq!(query.current, "original question");
    }

    #[test]
    fn test_loops_used_counts_rounds() {
        let mut state = LoopState::new("q");
        assert_eq!(state.loops_used(), 1);
        state.round += 1;
        assert_eq!(state.loops_used(), 2);
    }
}
