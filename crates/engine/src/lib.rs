//! Anchor answer engine
//!
//! The decision core of the service: a bounded self-critique /
//! re-retrieval loop that decides, per query, whether retrieved evidence
//! justifies a direct answer, whether another retrieval pass is warranted,
//! or whether a conservative fallback must be produced instead.
//!
//! Components:
//! - [`confidence`] - pure retrieval-score confidence policy
//! - [`drafter`] - evidence-grounded draft generation with claim lists
//! - [`critique`] - claim verification and continue/stop recommendation
//! - [`fallback`] - templated conservative answers
//! - [`controller`] - the loop state machine
//! - [`pipeline`] - single-pass (non-agentic) variant with token streaming

pub mod confidence;
pub mod controller;
pub mod critique;
pub mod drafter;
pub mod fallback;
pub mod pipeline;
mod prompts;
pub mod state;

pub use confidence::ConfidencePolicy;
pub use controller::{AnswerLoop, AskRequest};
pub use critique::{CritiqueEvaluator, CritiqueResult, Decision};
pub use drafter::{AnswerDrafter, Draft};
pub use pipeline::AnswerPipeline;

/// Answer substituted when retrieval produced no evidence at all
pub(crate) const NO_INFORMATION_ANSWER: &str = "No relevant information was found in the \
knowledge base for this question. Suggestions:\n\
1. Try rephrasing the question\n\
2. Check whether the knowledge base contains documents on this topic\n\
3. Upload more related material";

/// Answer substituted when the index holds no documents yet
pub(crate) const NOT_READY_ANSWER: &str = "The knowledge base has not been initialized yet. \
Please upload documents and run ingestion first.";
