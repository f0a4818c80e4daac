//! Golden answer domain types.
//!
//! A golden answer is a pre-vetted, human-approved answer with an
//! embedding for similarity matching. The fast path serves these
//! without invoking an LLM.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence band of a golden match, derived from similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Serve immediately, skip the LLM entirely.
    High,
    /// Serve after checking for regulatory changes since vetting.
    Low,
}

/// A vetted answer as stored in the golden store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenAnswer {
    pub faq_id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
    /// Embedding of the vetted question. Absent when the embedding
    /// backfill has not reached this row yet.
    pub embedding: Option<Vec<f32>>,
    /// When the answer was vetted; the KB delta check looks for
    /// regulatory changes after this instant.
    pub effective_at: DateTime<Utc>,
}

/// Match produced by the golden lookup, owned by the golden engine
/// until served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenMatch {
    pub faq_id: String,
    pub answer: String,
    pub citations: Vec<String>,
    pub similarity: f64,
    pub confidence: MatchConfidence,
}

/// A regulatory change recorded after a golden answer was vetted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryDelta {
    pub regulation: String,
    pub summary: String,
    pub changed_at: DateTime<Utc>,
}
