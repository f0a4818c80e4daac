//! Ranked retrieval over candidate passages.
//!
//! Three signals per candidate: full-text relevance (keyword index),
//! vector similarity and recency. The hybrid scorer combines them with
//! configured weights; when vector search is unavailable it degrades to
//! full-text-only ranking instead of failing the caller.

mod index;
mod query;
mod scorer;

pub use index::{tokenize, KeywordIndex};
pub use query::{RetrievalHit, RetrievalQuery, ScoreBreakdown};
pub use scorer::{cosine_similarity, recency_score, HybridScorer, RetrievalDoc};
