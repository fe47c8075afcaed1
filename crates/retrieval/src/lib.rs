//! Anchor retrieval layer
//!
//! Provides:
//! - A vector-index abstraction (opaque external service from the core's
//!   point of view, read-only here)
//! - Evidence types accumulated by the answer loop
//! - Similarity and maximal-marginal-relevance retrieval strategies

mod evidence;
mod index;
mod mmr;
mod retriever;

pub use evidence::{EvidenceItem, EvidenceSet};
pub use index::{InMemoryIndex, IndexFilter, IndexHit, VectorIndex};
pub use mmr::{cosine_similarity, mmr_select, MmrCandidate};
pub use retriever::{EvidenceRetriever, RetrieveOptions};
