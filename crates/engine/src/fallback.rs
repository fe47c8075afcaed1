//! Conservative fallback answers
//!
//! Purely templated from known fields. No generation backend is involved,
//! so the synthesizer cannot assert facts the evidence does not contain.

use anchor_common::types::truncate;
use anchor_retrieval::EvidenceItem;
use std::fmt::Write;

/// Evidence items quoted in a fallback answer
const MAX_QUOTED: usize = 3;

/// Snippet length for quoted evidence
const QUOTE_LEN: usize = 200;

/// Compose a low-confidence answer from what was actually found.
///
/// States the best-available evidence, why confidence is low, and what
/// kind of material is missing.
pub fn synthesize(
    question: &str,
    evidence: &[EvidenceItem],
    gaps: &[String],
    max_score: f32,
    min_score: f32,
) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "The knowledge base does not contain enough reliable information to \
answer \"{}\" with confidence.",
        question.trim()
    );

    if evidence.is_empty() {
        out.push_str("\nNo related passages were found at all.\n");
    } else {
        out.push_str("\nClosest material found:\n");
        for item in evidence.iter().take(MAX_QUOTED) {
            let _ = writeln!(
                out,
                "- {} ({}): {}",
                item.source,
                item.chunk_id,
                truncate(&item.content, QUOTE_LEN)
            );
        }
        let _ = writeln!(
            out,
            "\nThe best relevance score was {:.2}, below the {:.2} threshold \
required for a direct answer.",
            max_score, min_score
        );
    }

    if !gaps.is_empty() {
        out.push_str("\nMissing information:\n");
        for gap in gaps {
            let _ = writeln!(out, "- {}", gap);
        }
    }

    out.push_str(
        "\nSuggestions:\n\
1. Rephrase the question with more specific terms\n\
2. Upload documentation covering this topic\n\
3. Check whether related documents have been ingested",
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: &str, chunk_id: &str, content: &str, score: f32) -> EvidenceItem {
        EvidenceItem {
            source: source.to_string(),
            chunk_id: chunk_id.to_string(),
            content: content.to_string(),
            score,
            rank: 1,
        }
    }

    #[test]
    fn test_quotes_at_most_three_items() {
        let evidence: Vec<EvidenceItem> = (0..5)
            .map(|i| item("doc.md", &format!("c-{}", i), "some passage text", 0.2))
            .collect();

        let text = synthesize("what is the policy?", &evidence, &[], 0.2, 0.25);
        assert_eq!(text.matches("- doc.md").count(), 3);
        assert!(text.contains("0.20"));
        assert!(text.contains("0.25"));
    }

    #[test]
    fn test_empty_evidence_says_nothing_found() {
        let text = synthesize("anything?", &[], &[], 0.0, 0.25);
        assert!(text.contains("No related passages were found"));
        assert!(!text.contains("Closest material"));
    }

    #[test]
    fn test_gaps_are_listed() {
        let gaps = vec!["carry-over rules".to_string(), "part-time accrual".to_string()];
        let text = synthesize("leave?", &[item("a.md", "a-0", "x", 0.2)], &gaps, 0.2, 0.25);
        assert!(text.contains("Missing information:"));
        assert!(text.contains("- carry-over rules"));
        assert!(text.contains("- part-time accrual"));
    }
}
