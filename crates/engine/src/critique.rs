//! Draft critique
//!
//! Asks the generation backend to verify the draft's claims against the
//! retrieved sources and recommend whether to finalize or retrieve again.
//! The recommendation is advisory; the loop controller enforces the round
//! bound regardless of what comes back here.
//!
//! Failure policy is conservative: a backend error or an unparseable
//! verdict finalizes with LOW confidence rather than burning another
//! retrieval round on garbage.

use anchor_common::llm::{ChatMessage, ChatModel};
use anchor_common::types::ConfidenceLevel;
use anchor_retrieval::EvidenceSet;
use serde::Deserialize;
use std::sync::Arc;

use crate::drafter::{strip_code_fence, Draft};
use crate::prompts;

/// Continue/stop recommendation from the critique step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Final,
    NeedMore,
}

/// Parsed critique verdict
#[derive(Debug, Clone)]
pub struct CritiqueResult {
    pub decision: Decision,
    pub supported_claims: Vec<String>,
    pub unsupported_claims: Vec<String>,
    pub conflicts: Vec<String>,
    pub gaps: Vec<String>,
    pub refined_query: Option<String>,
    pub confidence: ConfidenceLevel,
    pub reasoning: String,
}

impl CritiqueResult {
    /// Verdict used when the critique step itself fails: finalize, LOW.
    fn failed(reason: &str) -> Self {
        Self {
            decision: Decision::Final,
            supported_claims: Vec::new(),
            unsupported_claims: Vec::new(),
            conflicts: Vec::new(),
            gaps: Vec::new(),
            refined_query: None,
            confidence: ConfidenceLevel::Low,
            reasoning: format!("Critique unavailable: {}", reason),
        }
    }

    /// Verdict for a draft that asserts nothing checkable
    fn no_claims() -> Self {
        Self {
            decision: Decision::Final,
            supported_claims: Vec::new(),
            unsupported_claims: Vec::new(),
            conflicts: Vec::new(),
            gaps: Vec::new(),
            refined_query: None,
            confidence: ConfidenceLevel::Medium,
            reasoning: "Draft carries no verifiable claims".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    decision: Decision,
    #[serde(default)]
    supported_claims: Vec<String>,
    #[serde(default)]
    unsupported_claims: Vec<String>,
    #[serde(default)]
    conflicts: Vec<String>,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    refined_query: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    reasoning: String,
}

/// Verifies drafts against evidence
pub struct CritiqueEvaluator {
    model: Arc<dyn ChatModel>,
    support_ratio: f32,
}

impl CritiqueEvaluator {
    pub fn new(model: Arc<dyn ChatModel>, support_ratio: f32) -> Self {
        Self {
            model,
            support_ratio,
        }
    }

    /// Critique a draft. Never returns an error: every failure mode maps
    /// to a finalize verdict.
    pub async fn critique(
        &self,
        question: &str,
        draft: &Draft,
        evidence: &EvidenceSet,
    ) -> CritiqueResult {
        if draft.claims.is_empty() {
            tracing::debug!("Draft has no claims, skipping verification");
            return CritiqueResult::no_claims();
        }

        let claims_json =
            serde_json::to_string(&draft.claims).unwrap_or_else(|_| "[]".to_string());
        let sources_json = serde_json::to_string(&evidence.dedup_sources())
            .unwrap_or_else(|_| "[]".to_string());

        let system = prompts::critique_system_prompt(
            question,
            &draft.answer,
            &claims_json,
            &sources_json,
            self.support_ratio,
        );
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user("Evaluate the draft."),
        ];

        let raw = match self.model.generate(&messages).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Critique call failed, finalizing with low confidence");
                return CritiqueResult::failed("backend error");
            }
        };

        match parse_verdict(&raw) {
            Some(result) => result,
            None => {
                tracing::warn!("Critique reply unparseable, finalizing with low confidence");
                CritiqueResult::failed("unparseable verdict")
            }
        }
    }
}

fn parse_verdict(raw: &str) -> Option<CritiqueResult> {
    let body = strip_code_fence(raw);
    let verdict: RawVerdict = serde_json::from_str(body).ok()?;

    let confidence = verdict
        .confidence
        .as_deref()
        .map(ConfidenceLevel::from_label)
        .unwrap_or(ConfidenceLevel::Medium);

    Some(CritiqueResult {
        decision: verdict.decision,
        supported_claims: verdict.supported_claims,
        unsupported_claims: verdict.unsupported_claims,
        conflicts: verdict.conflicts,
        gaps: verdict.gaps,
        refined_query: verdict.refined_query.filter(|q| !q.trim().is_empty()),
        confidence,
        reasoning: verdict.reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_common::llm::MockChatModel;

    fn draft_with_claims() -> Draft {
        Draft {
            answer: "Leave accrues at 20 days per year.".to_string(),
            claims: vec!["20 days accrue per year".to_string()],
        }
    }

    fn evaluator(model: MockChatModel) -> CritiqueEvaluator {
        CritiqueEvaluator::new(Arc::new(model), 0.7)
    }

    #[tokio::test]
    async fn test_final_verdict_parses() {
        let reply = r#"{
            "decision": "final",
            "supported_claims": ["20 days accrue per year"],
            "unsupported_claims": [],
            "conflicts": [],
            "gaps": [],
            "refined_query": null,
            "confidence": "high",
            "reasoning": "fully supported"
        }"#;
        let c = evaluator(MockChatModel::scripted(vec![reply]));

        let result = c
            .critique("how much leave?", &draft_with_claims(), &EvidenceSet::new())
            .await;
        assert_eq!(result.decision, Decision::Final);
        assert_eq!(result.confidence, ConfidenceLevel::High);
        assert!(result.refined_query.is_none());
    }

    #[tokio::test]
    async fn test_need_more_carries_refined_query() {
        let reply = r#"{
            "decision": "need_more",
            "gaps": ["carry-over rules missing"],
            "refined_query": "annual leave carry-over policy",
            "confidence": "low",
            "reasoning": "half the claims unsupported"
        }"#;
        let c = evaluator(MockChatModel::scripted(vec![reply]));

        let result = c
            .critique("how much leave?", &draft_with_claims(), &EvidenceSet::new())
            .await;
        assert_eq!(result.decision, Decision::NeedMore);
        assert_eq!(
            result.refined_query.as_deref(),
            Some("annual leave carry-over policy")
        );
        assert_eq!(result.gaps.len(), 1);
    }

    #[tokio::test]
    async fn test_claimless_draft_short_circuits() {
        // No backend call happens: a failing mock would otherwise error
        let c = evaluator(MockChatModel::failing());
        let draft = Draft {
            answer: "prose".to_string(),
            claims: vec![],
        };

        let result = c.critique("q", &draft, &EvidenceSet::new()).await;
        assert_eq!(result.decision, Decision::Final);
        assert_eq!(result.confidence, ConfidenceLevel::Medium);
    }

    #[tokio::test]
    async fn test_backend_failure_finalizes_low() {
        let c = evaluator(MockChatModel::failing());
        let result = c
            .critique("q", &draft_with_claims(), &EvidenceSet::new())
            .await;
        assert_eq!(result.decision, Decision::Final);
        assert_eq!(result.confidence, ConfidenceLevel::Low);
    }

    #[tokio::test]
    async fn test_unparseable_verdict_finalizes_low() {
        let c = evaluator(MockChatModel::scripted(vec!["I think it looks fine!"]));
        let result = c
            .critique("q", &draft_with_claims(), &EvidenceSet::new())
            .await;
        assert_eq!(result.decision, Decision::Final);
        assert_eq!(result.confidence, ConfidenceLevel::Low);
    }

    #[tokio::test]
    async fn test_blank_refined_query_dropped() {
        let reply = r#"{"decision": "need_more", "refined_query": "  ", "confidence": "low"}"#;
        let c = evaluator(MockChatModel::scripted(vec![reply]));
        let result = c
            .critique("q", &draft_with_claims(), &EvidenceSet::new())
            .await;
        assert!(result.refined_query.is_none());
    }
}
