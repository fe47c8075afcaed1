//! Draft generation
//!
//! Produces an evidence-grounded draft answer together with the list of
//! factual claims it makes. The claim list is what the critique step
//! verifies; an answer that arrives without a parseable claim list still
//! yields a usable draft with no claims.

use anchor_common::errors::Result;
use anchor_common::llm::{ChatMessage, ChatModel};
use anchor_common::profile::StyleProvider;
use anchor_common::types::AnswerMode;
use anchor_retrieval::EvidenceSet;
use serde::Deserialize;
use std::sync::Arc;

use crate::prompts;

/// A draft answer and the claims it asserts
#[derive(Debug, Clone, Deserialize)]
pub struct Draft {
    pub answer: String,

    #[serde(default)]
    pub claims: Vec<String>,
}

/// Generates drafts from accumulated evidence
pub struct AnswerDrafter {
    model: Arc<dyn ChatModel>,
    styles: Arc<dyn StyleProvider>,
}

impl AnswerDrafter {
    pub fn new(model: Arc<dyn ChatModel>, styles: Arc<dyn StyleProvider>) -> Self {
        Self { model, styles }
    }

    /// Draft an answer for `question` over `evidence`.
    ///
    /// Backend failures propagate; the caller decides how to degrade.
    pub async fn draft(
        &self,
        question: &str,
        evidence: &EvidenceSet,
        mode: AnswerMode,
        user_id: &str,
    ) -> Result<Draft> {
        let style = self.styles.style_prompt(user_id).await.unwrap_or_default();
        let context = prompts::format_evidence_context(evidence);
        let system = prompts::draft_system_prompt(mode, &style, &context);

        let messages = [ChatMessage::system(system), ChatMessage::user(question)];
        let raw = self.model.generate(&messages).await?;

        Ok(parse_draft(&raw))
    }

    /// Plain narrative answer without a claim list, for the single-pass
    /// variant.
    pub async fn answer(
        &self,
        question: &str,
        evidence: &EvidenceSet,
        mode: AnswerMode,
        user_id: &str,
    ) -> Result<String> {
        let style = self.styles.style_prompt(user_id).await.unwrap_or_default();
        let context = prompts::format_evidence_context(evidence);
        let system = prompts::answer_system_prompt(mode, &style, &context);

        let messages = [ChatMessage::system(system), ChatMessage::user(question)];
        self.model.generate(&messages).await
    }

    /// Same as [`answer`](Self::answer) but streaming tokens
    pub async fn answer_stream(
        &self,
        question: &str,
        evidence: &EvidenceSet,
        mode: AnswerMode,
        user_id: &str,
    ) -> Result<anchor_common::llm::TokenStream> {
        let style = self.styles.style_prompt(user_id).await.unwrap_or_default();
        let context = prompts::format_evidence_context(evidence);
        let system = prompts::answer_system_prompt(mode, &style, &context);

        let messages = [ChatMessage::system(system), ChatMessage::user(question)];
        self.model.generate_stream(&messages).await
    }
}

/// Strip a Markdown code fence wrapping, if present
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Language tag on the fence line is optional
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse the structured draft reply; non-JSON output degrades to a draft
/// with the raw text as answer and no claims.
fn parse_draft(raw: &str) -> Draft {
    let body = strip_code_fence(raw);
    match serde_json::from_str::<Draft>(body) {
        Ok(draft) if !draft.answer.trim().is_empty() => draft,
        Ok(_) | Err(_) => {
            tracing::debug!("Draft reply was not structured JSON, using raw text");
            Draft {
                answer: raw.trim().to_string(),
                claims: Vec::new(),
            }
        }
    }
}
