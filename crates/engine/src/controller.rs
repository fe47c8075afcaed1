//! Answer loop controller
//!
//! An explicit finite-state machine over
//! `RETRIEVE -> DRAFT -> CRITIQUE -> {REFINE -> RETRIEVE | FINALIZE}`,
//! bounded by a round counter. Evidence accumulates across rounds; the
//! critique's continue recommendation is overridden once the counter
//! reaches the bound, so termination never depends on backend judgment.

use anchor_common::config::RagConfig;
use anchor_common::types::{
    AnswerMode, AskOutcome, ConfidenceLevel, RetrievalMode, StreamEvent, TraceEntry,
};
use anchor_retrieval::{EvidenceRetriever, IndexFilter, RetrieveOptions};
use futures::channel::mpsc;
use futures::SinkExt;
use std::sync::Arc;
use uuid::Uuid;

use crate::confidence::ConfidencePolicy;
use crate::critique::{CritiqueEvaluator, Decision};
use crate::drafter::{AnswerDrafter, Draft};
use crate::fallback;
use crate::state::{LoopState, Step};
use crate::{NOT_READY_ANSWER, NO_INFORMATION_ANSWER};

/// Evidence snippets handed to the fallback synthesizer
const FALLBACK_EVIDENCE: usize = 5;

/// One answer request
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub user_id: String,

    /// Passages per retrieval pass; config default when absent
    pub top_k: Option<usize>,

    pub retrieval_mode: RetrievalMode,
    pub answer_mode: AnswerMode,

    /// Round bound; config default when absent
    pub max_loops: Option<u32>,

    /// Restrict retrieval to matching sources
    pub filter: Option<IndexFilter>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_id: user_id.into(),
            top_k: None,
            retrieval_mode: RetrievalMode::default(),
            answer_mode: AnswerMode::default(),
            max_loops: None,
            filter: None,
        }
    }
}

/// The bounded self-critique answer loop
pub struct AnswerLoop {
    retriever: Arc<EvidenceRetriever>,
    drafter: AnswerDrafter,
    critic: CritiqueEvaluator,
    policy: ConfidencePolicy,
    config: RagConfig,
}

impl AnswerLoop {
    pub fn new(
        retriever: Arc<EvidenceRetriever>,
        drafter: AnswerDrafter,
        critic: CritiqueEvaluator,
        config: RagConfig,
    ) -> Self {
        Self {
            retriever,
            drafter,
            critic,
            policy: ConfidencePolicy::from_config(&config),
            config,
        }
    }

    /// Run the loop to completion.
    ///
    /// Always yields a well-formed outcome: every failure path degrades
    /// to a low-confidence answer, never an error to the caller.
    pub async fn run(&self, request: &AskRequest) -> AskOutcome {
        self.run_with(request, || false).await
    }

    /// Streaming variant: replays the final answer as token chunks, then
    /// emits the terminal summary event. A closed channel means the client
    /// went away; the loop stops calling backends at the next step boundary
    /// and the result is simply dropped.
    pub async fn run_stream(&self, request: &AskRequest, mut tx: mpsc::Sender<StreamEvent>) {
        let outcome = self.run_with(request, || tx.is_closed()).await;

        for chunk in outcome.answer.split_inclusive(' ') {
            let event = StreamEvent::Token {
                delta: chunk.to_string(),
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }

        let _ = tx.send(StreamEvent::End(outcome)).await;
    }

    async fn run_with(
        &self,
        request: &AskRequest,
        cancelled: impl Fn() -> bool + Send + Sync,
    ) -> AskOutcome {
        if !self.retriever.is_ready() {
            tracing::warn!("Answer requested before any documents were ingested");
            return AskOutcome {
                message_id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                answer: NOT_READY_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: ConfidenceLevel::Low,
                reasoning_trace: vec![TraceEntry::step("retrieve").with_decision("index_not_ready")],
                loops_used: 1,
            };
        }

        match self.run_inner(request, &cancelled).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Answer loop aborted");
                AskOutcome {
                    message_id: Uuid::new_v4(),
                    created_at: chrono::Utc::now(),
                    answer: format!(
                        "The question could not be processed due to an internal error: {}",
                        e
                    ),
                    sources: Vec::new(),
                    confidence: ConfidenceLevel::Low,
                    reasoning_trace: vec![TraceEntry::step("error").with_decision("aborted")],
                    loops_used: 1,
                }
            }
        }
    }

    async fn run_inner(
        &self,
        request: &AskRequest,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> anchor_common::errors::Result<AskOutcome> {
        let top_k = request.top_k.unwrap_or(self.config.top_k);
        let max_loops = request.max_loops.unwrap_or(self.config.max_loops).max(1);

        let mut state = LoopState::new(&request.question);
        let mut step = Step::Retrieve;
        let mut draft_failed = false;

        loop {
            // A cancelled request skips straight to finalize instead of
            // issuing further retrieval or backend calls
            if cancelled() && !matches!(step, Step::Finalize) {
                tracing::debug!(round = state.round, "Client disconnected, finalizing early");
                state.record(TraceEntry::step("cancel").with_decision("client_disconnected"));
                step = Step::Finalize;
            }

            match step {
                Step::Retrieve => {
                    let options = RetrieveOptions {
                        mode: request.retrieval_mode,
                        k: top_k,
                        fetch_k: None,
                        diversity_weight: None,
                        filter: request.filter.clone(),
                    };
                    let items = self.retriever.retrieve(&state.query.current, &options).await;

                    tracing::debug!(
                        round = state.round,
                        retrieved = items.len(),
                        total = state.evidence.len() + items.len(),
                        "Retrieval pass complete"
                    );
                    state.record(
                        TraceEntry::step("retrieve")
                            .with_query(&state.query.current)
                            .with_round(state.round)
                            .with_decision(&format!("{} passages", items.len())),
                    );

                    state.evidence.extend(items);
                    step = Step::Draft;
                }

                Step::Draft => {
                    if state.evidence.is_empty() {
                        state.record(TraceEntry::step("draft").with_decision("no_evidence"));
                        state.draft = Some(Draft {
                            answer: NO_INFORMATION_ANSWER.to_string(),
                            claims: Vec::new(),
                        });
                        step = Step::Finalize;
                        continue;
                    }

                    match self
                        .drafter
                        .draft(
                            &state.query.original,
                            &state.evidence,
                            request.answer_mode,
                            &request.user_id,
                        )
                        .await
                    {
                        Ok(draft) => {
                            state.record(
                                TraceEntry::step("draft")
                                    .with_decision(&format!("{} claims", draft.claims.len())),
                            );
                            state.draft = Some(draft);
                            step = Step::Critique;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Draft generation failed, finalizing via fallback");
                            state.record(TraceEntry::step("draft").with_decision("backend_error"));
                            draft_failed = true;
                            step = Step::Finalize;
                        }
                    }
                }

                Step::Critique => {
                    let draft = state.draft.as_ref().ok_or_else(|| {
                        anchor_common::errors::AppError::Internal {
                            message: "critique entered without a draft".to_string(),
                        }
                    })?;

                    let result = self
                        .critic
                        .critique(&state.query.original, draft, &state.evidence)
                        .await;

                    let wants_more = result.decision == Decision::NeedMore;
                    let forced = wants_more && state.round >= max_loops - 1;

                    state.record(
                        TraceEntry::step("critique")
                            .with_round(state.round)
                            .with_decision(if forced {
                                "need_more (forced final)"
                            } else if wants_more {
                                "need_more"
                            } else {
                                "final"
                            }),
                    );
                    state.critique = Some(result);

                    step = if wants_more && !forced {
                        Step::Refine
                    } else {
                        Step::Finalize
                    };
                }

                Step::Refine => {
                    let refined = state
                        .critique
                        .as_ref()
                        .and_then(|c| c.refined_query.clone());
                    state.query.refine(refined);
                    state.round += 1;

                    state.record(
                        TraceEntry::step("refine")
                            .with_query(&state.query.current)
                            .with_round(state.round),
                    );
                    step = Step::Retrieve;
                }

                Step::Finalize => {
                    return Ok(self.finalize(state, draft_failed));
                }
            }
        }
    }

    /// Produce the outcome from terminal loop state.
    ///
    /// The draft is emitted verbatim when confidence is HIGH/MEDIUM or no
    /// gaps were reported; otherwise the templated fallback takes over
    /// and confidence drops to LOW.
    fn finalize(&self, mut state: LoopState, draft_failed: bool) -> AskOutcome {
        let loops_used = state.loops_used();

        if state.evidence.is_empty() {
            state.record(TraceEntry::step("finalize").with_decision("no_information"));
            return AskOutcome {
                message_id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                answer: NO_INFORMATION_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: ConfidenceLevel::Low,
                reasoning_trace: state.trace,
                loops_used,
            };
        }

        let gaps: Vec<String> = state
            .critique
            .as_ref()
            .map(|c| c.gaps.clone())
            .unwrap_or_default();

        let confidence = match &state.critique {
            Some(c) => c.confidence,
            // No critique ran (draft failure); grade on evidence alone
            None => self.policy.evaluate(&state.evidence).0,
        };

        let use_draft = !draft_failed
            && (matches!(confidence, ConfidenceLevel::High | ConfidenceLevel::Medium)
                || gaps.is_empty());

        let (answer, confidence) = if use_draft {
            state.record(TraceEntry::step("finalize").with_decision("draft"));
            let answer = state
                .draft
                .map(|d| d.answer)
                .unwrap_or_else(|| NO_INFORMATION_ANSWER.to_string());
            (answer, confidence)
        } else {
            state.record(TraceEntry::step("finalize").with_decision("fallback"));
            let answer = fallback::synthesize(
                &state.query.original,
                state.evidence.top(FALLBACK_EVIDENCE),
                &gaps,
                state.evidence.max_score(),
                self.policy.min_score,
            );
            (answer, ConfidenceLevel::Low)
        };

        AskOutcome {
            message_id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            answer,
            sources: state.evidence.dedup_sources(),
            confidence,
            reasoning_trace: state.trace,
            loops_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_common::embeddings::{Embedder, MockEmbedder};
    use anchor_common::llm::MockChatModel;
    use anchor_common::profile::InMemoryProfiles;
    use anchor_retrieval::InMemoryIndex;
    use futures::StreamExt;

    const DIM: usize = 256;

    async fn seeded_retriever(docs: &[(&str, &str, &str)]) -> Arc<EvidenceRetriever> {
        let embedder = MockEmbedder::new(DIM);
        let index = InMemoryIndex::new();
        for (source, chunk_id, content) in docs {
            let embedding = embedder.embed(content).await.unwrap();
            index.add_chunk(*source, *chunk_id, *content, embedding);
        }
        Arc::new(EvidenceRetriever::new(
            Arc::new(MockEmbedder::new(DIM)),
            Arc::new(index),
            RagConfig::default(),
        ))
    }

    fn answer_loop(retriever: Arc<EvidenceRetriever>, model: MockChatModel) -> AnswerLoop {
        let model = Arc::new(model);
        let drafter = AnswerDrafter::new(model.clone(), Arc::new(InMemoryProfiles::new()));
        let critic = CritiqueEvaluator::new(model, 0.7);
        AnswerLoop::new(retriever, drafter, critic, RagConfig::default())
    }

    const LEAVE_DOCS: &[(&str, &str, &str)] = &[
        ("leave.md", "leave-0", "Employees accrue 20 days of annual leave"),
        ("leave.md", "leave-1", "Unused leave carries over up to 5 days"),
        ("expense.md", "exp-0", "Travel expenses need receipts"),
    ];

    fn draft_reply() -> &'static str {
        r#"{"answer": "20 days per year.", "claims": ["20 days accrue per year"]}"#
    }

    fn critique_final(confidence: &str) -> String {
        format!(
            r#"{{"decision": "final", "supported_claims": ["20 days accrue per year"], "confidence": "{}", "reasoning": "supported"}}"#,
            confidence
        )
    }

    fn critique_need_more() -> &'static str {
        r#"{"decision": "need_more", "gaps": ["carry-over details"], "refined_query": "leave carry-over rules", "confidence": "low", "reasoning": "incomplete"}"#
    }

    #[tokio::test]
    async fn test_single_round_final() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        let verdict = critique_final("high");
        let model = MockChatModel::scripted(vec![draft_reply(), verdict.as_str()]);
        let l = answer_loop(retriever, model);

        let outcome = l.run(&AskRequest::new("how much leave?", "u1")).await;
        assert_eq!(outcome.answer, "20 days per year.");
        assert_eq!(outcome.confidence, ConfidenceLevel::High);
        assert_eq!(outcome.loops_used, 1);
        assert!(!outcome.sources.is_empty());
    }

    #[tokio::test]
    async fn test_need_more_triggers_second_round() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        // Round 0 drafts and asks for more; round 1 drafts and finalizes
        let verdict = critique_final("medium");
        let model = MockChatModel::scripted(vec![
            draft_reply(),
            critique_need_more(),
            draft_reply(),
            verdict.as_str(),
        ]);
        let l = answer_loop(retriever, model);

        let outcome = l.run(&AskRequest::new("how much leave?", "u1")).await;
        assert_eq!(outcome.loops_used, 2);
        assert_eq!(outcome.confidence, ConfidenceLevel::Medium);

        let refine_steps: Vec<&TraceEntry> = outcome
            .reasoning_trace
            .iter()
            .filter(|t| t.step == "refine")
            .collect();
        assert_eq!(refine_steps.len(), 1);
        assert_eq!(refine_steps[0].query.as_deref(), Some("leave carry-over rules"));
    }

    #[tokio::test]
    async fn test_round_bound_overrides_need_more() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        // The critique keeps asking for more; the bound must stop it
        let model = MockChatModel::scripted(vec![
            draft_reply(),
            critique_need_more(),
            draft_reply(),
            critique_need_more(),
            draft_reply(),
            critique_need_more(),
        ]);
        let l = answer_loop(retriever, model);

        let mut request = AskRequest::new("how much leave?", "u1");
        request.max_loops = Some(2);
        let outcome = l.run(&request).await;

        assert_eq!(outcome.loops_used, 2);
        assert!(outcome.loops_used <= 2 + 1);
        let forced = outcome
            .reasoning_trace
            .iter()
            .any(|t| t.decision.as_deref() == Some("need_more (forced final)"));
        assert!(forced);
    }

    #[tokio::test]
    async fn test_sources_deduplicated_across_rounds() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        // Both rounds retrieve the same corpus, so raw evidence repeats
        let verdict = critique_final("high");
        let model = MockChatModel::scripted(vec![
            draft_reply(),
            critique_need_more(),
            draft_reply(),
            verdict.as_str(),
        ]);
        let l = answer_loop(retriever, model);

        let outcome = l.run(&AskRequest::new("how much leave?", "u1")).await;
        let mut keys: Vec<(String, String)> = outcome
            .sources
            .iter()
            .map(|s| (s.source.clone(), s.chunk_id.clone()))
            .collect();
        let before = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), before);
    }

    #[tokio::test]
    async fn test_empty_retrieval_round_zero() {
        // Ready index, but the filter matches nothing
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        let l = answer_loop(retriever, MockChatModel::failing());

        let mut request = AskRequest::new("anything?", "u1");
        request.max_loops = Some(2);
        request.filter = Some(IndexFilter {
            source: Some("missing.md".to_string()),
        });
        let outcome = l.run(&request).await;

        assert_eq!(outcome.loops_used, 1);
        assert_eq!(outcome.confidence, ConfidenceLevel::Low);
        assert!(outcome.sources.is_empty());
        assert!(outcome.answer.contains("No relevant information"));
    }

    #[tokio::test]
    async fn test_critique_failure_finalizes_low_not_panic() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        // Draft succeeds, then the backend dies for the critique call
        let model = MockChatModel::scripted(vec![draft_reply()]);
        let l = answer_loop(retriever, model);

        let outcome = l.run(&AskRequest::new("how much leave?", "u1")).await;
        assert_eq!(outcome.confidence, ConfidenceLevel::Low);
        assert_eq!(outcome.loops_used, 1);
    }

    #[tokio::test]
    async fn test_draft_failure_degrades_to_fallback() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        let l = answer_loop(retriever, MockChatModel::failing());

        let outcome = l.run(&AskRequest::new("how much leave?", "u1")).await;
        assert_eq!(outcome.confidence, ConfidenceLevel::Low);
        assert!(outcome.answer.contains("Suggestions:"));
        assert!(!outcome.sources.is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_with_gaps_uses_fallback() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        let reply = r#"{"decision": "final", "gaps": ["part-time accrual"], "confidence": "low", "reasoning": "thin"}"#;
        let model = MockChatModel::scripted(vec![draft_reply(), reply]);
        let l = answer_loop(retriever, model);

        let outcome = l.run(&AskRequest::new("how much leave?", "u1")).await;
        assert_eq!(outcome.confidence, ConfidenceLevel::Low);
        assert!(outcome.answer.contains("part-time accrual"));
    }

    #[tokio::test]
    async fn test_stream_replays_answer_then_end() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        let verdict = critique_final("high");
        let model = MockChatModel::scripted(vec![draft_reply(), verdict.as_str()]);
        let l = answer_loop(retriever, model);

        let (tx, rx) = mpsc::channel(16);
        l.run_stream(&AskRequest::new("how much leave?", "u1"), tx)
            .await;

        let events: Vec<StreamEvent> = rx.collect().await;
        let mut tokens = String::new();
        let mut saw_end = false;
        for event in events {
            match event {
                StreamEvent::Token { delta } => tokens.push_str(&delta),
                StreamEvent::End(outcome) => {
                    saw_end = true;
                    assert_eq!(outcome.answer, tokens);
                }
                StreamEvent::Error { error } => panic!("unexpected error event: {}", error),
            }
        }
        assert!(saw_end);
    }

    #[tokio::test]
    async fn test_stream_client_disconnect_stops_backend_calls() {
        let retriever = seeded_retriever(LEAVE_DOCS).await;
        // Script enough rounds that a runaway loop would use them all
        let model = Arc::new(MockChatModel::scripted(vec![
            draft_reply(),
            critique_need_more(),
            draft_reply(),
            critique_need_more(),
            draft_reply(),
            critique_need_more(),
        ]));
        let drafter = AnswerDrafter::new(model.clone(), Arc::new(InMemoryProfiles::new()));
        let critic = CritiqueEvaluator::new(model.clone(), 0.7);
        let l = AnswerLoop::new(retriever, drafter, critic, RagConfig::default());

        let mut request = AskRequest::new("how much leave?", "u1");
        request.max_loops = Some(3);

        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        l.run_stream(&request, tx).await;

        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_not_ready_index_short_circuits() {
        let retriever = Arc::new(EvidenceRetriever::new(
            Arc::new(MockEmbedder::new(DIM)),
            Arc::new(InMemoryIndex::new()),
            RagConfig::default(),
        ));
        let l = answer_loop(retriever, MockChatModel::failing());

        let outcome = l.run(&AskRequest::new("anything?", "u1")).await;
        assert_eq!(outcome.confidence, ConfidenceLevel::Low);
        assert_eq!(outcome.loops_used, 1);
    }
}
