//! Instruction templates for the generation backend
//!
//! The drafter and critique evaluator both expect structured JSON back;
//! the degradation path for non-conforming output lives with the parsers,
//! not here.

use anchor_common::types::AnswerMode;
use anchor_retrieval::EvidenceSet;
use std::fmt::Write;

const STRICT_RULES: &str = "\
Important rules:
1. The answer MUST be based only on the provided context.
2. If the context holds no relevant information, state plainly that the \
knowledge base cannot answer this question.
3. NEVER invent, guess, or use knowledge outside the context.
4. Cite the specific sources supporting your answer.
5. If the evidence is thin, say so explicitly.";

const BALANCED_RULES: &str = "\
Important rules:
1. Base the answer primarily on the provided context.
2. Reasonable inference is permitted, but label it, e.g. \"inferred from \
the context\".
3. General knowledge outside the context must be labeled, e.g. \"in \
general\".
4. Cite the specific sources supporting your answer.";

const CREATIVE_RULES: &str = "\
Important rules:
1. Ground the answer in the provided context.
2. You may extend and make suggestions beyond it.
3. Clearly separate \"from the material\" from \"suggestion/extension\".
4. Cite sources for the core of the answer.";

/// Serialize evidence into the context block shared by all templates
pub fn format_evidence_context(evidence: &EvidenceSet) -> String {
    let mut out = String::new();
    for (i, item) in evidence.iter().enumerate() {
        if i > 0 {
            out.push_str("\n---\n");
        }
        let _ = write!(
            out,
            "[Source {}] file: {}, id: {}, relevance: {:.3}\n{}\n",
            i + 1,
            item.source,
            item.chunk_id,
            item.score,
            item.content
        );
    }
    out
}

fn rules_for(mode: AnswerMode) -> &'static str {
    match mode {
        AnswerMode::Strict => STRICT_RULES,
        AnswerMode::Balanced => BALANCED_RULES,
        AnswerMode::Creative => CREATIVE_RULES,
    }
}

/// System prompt for the single-pass pipeline (plain narrative answer)
pub fn answer_system_prompt(mode: AnswerMode, user_style: &str, context: &str) -> String {
    format!(
        "You are a knowledge-base assistant. Answer the user's question \
from the context below.\n\n{rules}\n\nUser preferences: {style}\n\n---\n\
Context:\n{context}\n---\n\nAnswer the user's question from the \
information above.",
        rules = rules_for(mode),
        style = user_style,
        context = context,
    )
}

/// System prompt for the drafter (structured answer + claim list)
pub fn draft_system_prompt(mode: AnswerMode, user_style: &str, context: &str) -> String {
    format!(
        "You are a knowledge-base assistant. Answer the user's question \
from the context below.\n\n{rules}\n\nUser preferences: {style}\n\n---\n\
Context:\n{context}\n---\n\nProduce the answer together with the list of \
its core factual claims. Respond with JSON only, in this shape:\n\
{{\n  \"answer\": \"the full answer\",\n  \"claims\": [\"claim 1\", \
\"claim 2\"]\n}}\n\nEach claim must be a verifiable factual statement \
from your answer.",
        rules = rules_for(mode),
        style = user_style,
        context = context,
    )
}

/// System prompt for the critique evaluator
pub fn critique_system_prompt(
    question: &str,
    draft_answer: &str,
    claims_json: &str,
    sources_json: &str,
    support_ratio: f32,
) -> String {
    format!(
        "You are a strict quality checker. Verify whether the draft answer \
and its claims are sufficiently supported by the retrieved sources.\n\n\
Question: {question}\nDraft answer: {draft}\nClaims: {claims}\n\
Retrieved sources: {sources}\n\nCheck:\n\
1. Is each claim backed by a source?\n\
2. Does anything contradict the sources?\n\
3. Is key information missing?\n\n\
Respond with JSON only, in this shape:\n{{\n\
  \"decision\": \"final\" or \"need_more\",\n\
  \"supported_claims\": [\"claims with evidence\"],\n\
  \"unsupported_claims\": [\"claims lacking evidence\"],\n\
  \"conflicts\": [\"points contradicting the sources\"],\n\
  \"gaps\": [\"missing information\"],\n\
  \"refined_query\": \"an improved search query when decision is \
need_more, else null\",\n\
  \"confidence\": \"high\", \"medium\" or \"low\",\n\
  \"reasoning\": \"a short justification\"\n}}\n\n\
Decision policy: recommend \"final\" when more than {ratio:.0}% of the \
claims are supported and there is no major contradiction; otherwise \
\"need_more\".",
        question = question,
        draft = draft_answer,
        claims = claims_json,
        sources = sources_json,
        ratio = support_ratio * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_retrieval::EvidenceItem;

    #[test]
    fn test_context_formatting() {
        let mut evidence = EvidenceSet::new();
        evidence.extend(vec![
            EvidenceItem {
                source: "leave.md".into(),
                chunk_id: "leave-0".into(),
                content: "Employees accrue 20 days.".into(),
                score: 0.82,
                rank: 1,
            },
            EvidenceItem {
                source: "leave.md".into(),
                chunk_id: "leave-1".into(),
                content: "Carry-over caps at 5 days.".into(),
                score: 0.61,
                rank: 2,
            },
        ]);

        let context = format_evidence_context(&evidence);
        assert!(context.contains("[Source 1] file: leave.md, id: leave-0, relevance: 0.820"));
        assert!(context.contains("[Source 2]"));
        assert!(context.contains("---"));
    }

    #[test]
    fn test_mode_rules_differ() {
        let strict = draft_system_prompt(AnswerMode::Strict, "", "ctx");
        let balanced = draft_system_prompt(AnswerMode::Balanced, "", "ctx");
        let creative = draft_system_prompt(AnswerMode::Creative, "", "ctx");
        assert!(strict.contains("NEVER invent"));
        assert!(balanced.contains("inferred from"));
        assert!(creative.contains("suggestion/extension"));
    }

    #[test]
    fn test_critique_prompt_carries_policy_ratio() {
        let prompt = critique_system_prompt("q", "a", "[]", "[]", 0.7);
        assert!(prompt.contains("more than 70% of the claims"));
        assert!(prompt.contains("\"need_more\""));
    }
}
