//! Core request/response types shared across Anchor services

use serde::{Deserialize, Serialize};

/// Coarse trustworthiness estimate for an answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// Parse a loosely-formatted label coming back from the model
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "high" => ConfidenceLevel::High,
            "low" => ConfidenceLevel::Low,
            _ => ConfidenceLevel::Medium,
        }
    }
}

/// Retrieval strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Plain similarity top-k
    Similarity,
    /// Maximal-marginal-relevance re-ranking for diversity
    Mmr,
}

impl Default for RetrievalMode {
    fn default() -> Self {
        RetrievalMode::Similarity
    }
}

/// How far the drafter may go beyond the retrieved evidence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// No extrapolation beyond the context
    Strict,
    /// Labeled inference permitted
    Balanced,
    /// Labeled extension permitted
    Creative,
}

impl Default for AnswerMode {
    fn default() -> Self {
        AnswerMode::Strict
    }
}

/// One cited source in a final response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    /// Source document identifier
    pub source: String,

    /// Chunk identifier within the source
    pub chunk_id: String,

    /// Relevant snippet (truncated)
    pub snippet: String,

    /// Relevance score (normalized, higher = more relevant)
    pub score: f32,

    /// Rank position in the retrieval result list (1-based)
    pub rank: usize,
}

/// Append-only log record of one answer-loop step.
///
/// Observability only; never feeds back into control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Step name (retrieve, draft, critique, refine, finalize, error)
    pub step: String,

    /// Query prefix at this step, when one applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Decision taken at this step, when one applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    /// Round number, when one applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

impl TraceEntry {
    pub fn step(step: &str) -> Self {
        Self {
            step: step.to_string(),
            query: None,
            decision: None,
            round: None,
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(truncate(query, 50));
        self
    }

    pub fn with_decision(mut self, decision: &str) -> Self {
        self.decision = Some(decision.to_string());
        self
    }

    pub fn with_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }
}

/// Final outcome of one answer request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskOutcome {
    /// Unique message id
    pub message_id: uuid::Uuid,

    /// When the answer was produced
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Final answer text
    pub answer: String,

    /// Deduplicated sources, first-seen order
    pub sources: Vec<SourceInfo>,

    /// Confidence in the answer
    pub confidence: ConfidenceLevel,

    /// Decision trace across the loop
    pub reasoning_trace: Vec<TraceEntry>,

    /// Retrieval passes performed (>= 1)
    pub loops_used: u32,
}

/// Event emitted by the streaming variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// One incremental answer fragment
    Token { delta: String },
    /// Terminal summary carrying the full outcome
    End(AskOutcome),
    /// Terminal error
    Error { error: String },
}

/// Truncate a string to at most `max` characters, appending an ellipsis
/// when anything was cut. Operates on char boundaries.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
