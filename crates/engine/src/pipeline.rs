//! Single-pass answer pipeline
//!
//! The non-agentic variant: one retrieval pass, a confidence gate, then
//! either direct generation, a templated fallback, or a fixed
//! no-information answer. Unlike the loop controller it streams real
//! tokens, since there is no critique step between generation and the
//! caller.

use anchor_common::config::RagConfig;
use anchor_common::types::{AnswerMode, AskOutcome, ConfidenceLevel, StreamEvent, TraceEntry};
use anchor_retrieval::{EvidenceRetriever, EvidenceSet, RetrieveOptions};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

use crate::confidence::ConfidencePolicy;
use crate::controller::AskRequest;
use crate::drafter::AnswerDrafter;
use crate::fallback;
use crate::{NOT_READY_ANSWER, NO_INFORMATION_ANSWER};

/// Evidence snippets handed to the fallback synthesizer
const FALLBACK_EVIDENCE: usize = 5;

/// How the single pass resolved, for the trace
enum Resolution {
    NotReady,
    NoInformation,
    Fallback,
    Generated,
}

impl Resolution {
    fn label(&self) -> &'static str {
        match self {
            Resolution::NotReady => "index_not_ready",
            Resolution::NoInformation => "no_information",
            Resolution::Fallback => "fallback",
            Resolution::Generated => "generated",
        }
    }
}

/// One-shot retrieve-gate-generate pipeline
pub struct AnswerPipeline {
    retriever: Arc<EvidenceRetriever>,
    drafter: AnswerDrafter,
    policy: ConfidencePolicy,
    config: RagConfig,
}

impl AnswerPipeline {
    pub fn new(
        retriever: Arc<EvidenceRetriever>,
        drafter: AnswerDrafter,
        config: RagConfig,
    ) -> Self {
        Self {
            retriever,
            drafter,
            policy: ConfidencePolicy::from_config(&config),
            config,
        }
    }

    /// Answer in one pass. Always yields a well-formed outcome.
    pub async fn answer(&self, request: &AskRequest) -> AskOutcome {
        let (evidence, gate) = self.gather(request).await;

        let (answer, confidence, resolution) = match gate {
            Gate::NotReady => (
                NOT_READY_ANSWER.to_string(),
                ConfidenceLevel::Low,
                Resolution::NotReady,
            ),
            Gate::NoInformation => (
                NO_INFORMATION_ANSWER.to_string(),
                ConfidenceLevel::Low,
                Resolution::NoInformation,
            ),
            Gate::Fallback => (
                self.fallback_answer(request, &evidence),
                ConfidenceLevel::Low,
                Resolution::Fallback,
            ),
            Gate::Generate(level) => match self
                .drafter
                .answer(&request.question, &evidence, request.answer_mode, &request.user_id)
                .await
            {
                Ok(text) => (text, level, Resolution::Generated),
                Err(e) => {
                    tracing::warn!(error = %e, "Generation failed, degrading to fallback");
                    (
                        self.fallback_answer(request, &evidence),
                        ConfidenceLevel::Low,
                        Resolution::Fallback,
                    )
                }
            },
        };

        self.outcome(answer, confidence, &evidence, &resolution)
    }

    /// Streaming variant. Templated paths are replayed as chunks; the
    /// generated path forwards real backend tokens. A backend stream
    /// error mid-answer surfaces as a terminal error event.
    pub async fn answer_stream(&self, request: &AskRequest, mut tx: mpsc::Sender<StreamEvent>) {
        let (evidence, gate) = self.gather(request).await;

        let (template, confidence, resolution) = match gate {
            Gate::NotReady => (
                Some(NOT_READY_ANSWER.to_string()),
                ConfidenceLevel::Low,
                Resolution::NotReady,
            ),
            Gate::NoInformation => (
                Some(NO_INFORMATION_ANSWER.to_string()),
                ConfidenceLevel::Low,
                Resolution::NoInformation,
            ),
            Gate::Fallback => (
                Some(self.fallback_answer(request, &evidence)),
                ConfidenceLevel::Low,
                Resolution::Fallback,
            ),
            Gate::Generate(level) => (None, level, Resolution::Generated),
        };

        let answer = match template {
            Some(text) => {
                for chunk in text.split_inclusive(' ') {
                    let event = StreamEvent::Token {
                        delta: chunk.to_string(),
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                text
            }
            None => {
                let stream = self
                    .drafter
                    .answer_stream(
                        &request.question,
                        &evidence,
                        request.answer_mode,
                        &request.user_id,
                    )
                    .await;

                let mut stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                error: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };

                let mut collected = String::new();
                while let Some(piece) = stream.next().await {
                    match piece {
                        Ok(delta) => {
                            collected.push_str(&delta);
                            let event = StreamEvent::Token { delta };
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(StreamEvent::Error {
                                    error: e.to_string(),
                                })
                                .await;
                            return;
                        }
                    }
                }
                collected
            }
        };

        let outcome = self.outcome(answer, confidence, &evidence, &resolution);
        let _ = tx.send(StreamEvent::End(outcome)).await;
    }

    /// Retrieve once and apply the confidence gate
    async fn gather(&self, request: &AskRequest) -> (EvidenceSet, Gate) {
        if !self.retriever.is_ready() {
            return (EvidenceSet::new(), Gate::NotReady);
        }

        let options = RetrieveOptions {
            mode: request.retrieval_mode,
            k: request.top_k.unwrap_or(self.config.top_k),
            fetch_k: None,
            diversity_weight: None,
            filter: request.filter.clone(),
        };

        let mut evidence = EvidenceSet::new();
        evidence.extend(self.retriever.retrieve(&request.question, &options).await);

        if evidence.is_empty() {
            return (evidence, Gate::NoInformation);
        }

        let (level, needs_fallback) = self.policy.evaluate(&evidence);

        // Strict mode refuses to generate over insufficient evidence;
        // the looser modes generate anyway and let the grade stand.
        let gate = if needs_fallback && request.answer_mode == AnswerMode::Strict {
            Gate::Fallback
        } else {
            Gate::Generate(level)
        };

        (evidence, gate)
    }

    fn fallback_answer(&self, request: &AskRequest, evidence: &EvidenceSet) -> String {
        fallback::synthesize(
            &request.question,
            evidence.top(FALLBACK_EVIDENCE),
            &[],
            evidence.max_score(),
            self.policy.min_score,
        )
    }

    fn outcome(
        &self,
        answer: String,
        confidence: ConfidenceLevel,
        evidence: &EvidenceSet,
        resolution: &Resolution,
    ) -> AskOutcome {
        AskOutcome {
            message_id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            answer,
            sources: evidence.dedup_sources(),
            confidence,
            reasoning_trace: vec![
                TraceEntry::step("retrieve")
                    .with_round(0)
                    .with_decision(&format!("{} passages", evidence.len())),
                TraceEntry::step("finalize").with_decision(resolution.label()),
            ],
            loops_used: 1,
        }
    }
}

/// Outcome of the confidence gate
enum Gate {
    NotReady,
    NoInformation,
    Fallback,
    Generate(ConfidenceLevel),
}
