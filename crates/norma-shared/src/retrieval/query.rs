//! Retrieval query and hit types.

use serde::{Deserialize, Serialize};

/// A ranked-retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub text: String,
    pub top_k: usize,
    /// Hits scoring below this are dropped.
    pub min_score: f64,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: 10,
            min_score: 0.0,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

/// Per-signal scores for one hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Normalized full-text relevance, 0..1.
    pub fts: f64,
    /// 1 - cosine distance; zero when vectors were unavailable.
    pub vector: f64,
    /// Exponential half-life decay over the effective timestamp, 0..1.
    pub recency: f64,
    /// Configured weighted sum.
    pub combined: f64,
}

/// One ranked result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub doc_id: String,
    pub content: String,
    pub scores: ScoreBreakdown,
    /// False when the ranking degraded to full-text only.
    pub vector_available: bool,
}
