//! Hybrid relevance scorer.

use super::index::KeywordIndex;
use super::query::{RetrievalHit, RetrievalQuery, ScoreBreakdown};
use crate::config::RetrievalConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidate passage with optional embedding and effective timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalDoc {
    pub doc_id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub effective_at: DateTime<Utc>,
}

/// Cosine similarity, 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Exponential half-life decay over the document age, 1.0 at age zero.
pub fn recency_score(effective_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_days = (now - effective_at).num_seconds().max(0) as f64 / 86_400.0;
    if half_life_days <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age_days / half_life_days)
}

/// Ranks candidates by weighted full-text, vector and recency signals.
///
/// Vector search unavailable (no query embedding, or no candidate carries
/// one) degrades to full-text-only ranking; the caller still gets ranked
/// results, same fail-open posture as the cache layer.
pub struct HybridScorer {
    config: RetrievalConfig,
    docs: Vec<RetrievalDoc>,
    index: KeywordIndex,
}

impl HybridScorer {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            docs: vec![],
            index: KeywordIndex::new(),
        }
    }

    pub fn with_docs(config: RetrievalConfig, docs: Vec<RetrievalDoc>) -> Self {
        let mut scorer = Self::new(config);
        for doc in docs {
            scorer.add_document(doc);
        }
        scorer
    }

    pub fn add_document(&mut self, doc: RetrievalDoc) {
        self.index.add_document(&doc.doc_id, &doc.content);
        if let Some(pos) = self.docs.iter().position(|d| d.doc_id == doc.doc_id) {
            self.docs[pos] = doc;
        } else {
            self.docs.push(doc);
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Rank all candidates for the query.
    ///
    /// A candidate is kept only when full-text or vector matched it;
    /// recency alone never surfaces an unrelated passage.
    pub fn rank(
        &self,
        query: &RetrievalQuery,
        query_embedding: Option<&[f32]>,
        now: DateTime<Utc>,
    ) -> Vec<RetrievalHit> {
        let fts_raw = self.index.scores(&query.text);
        let fts_max = fts_raw.values().cloned().fold(0.0f64, f64::max);

        let vector_available =
            query_embedding.is_some() && self.docs.iter().any(|d| d.embedding.is_some());

        let mut hits: Vec<RetrievalHit> = vec![];
        for doc in &self.docs {
            let fts = match fts_raw.get(&doc.doc_id) {
                Some(raw) if fts_max > 0.0 => raw / fts_max,
                _ => 0.0,
            };

            let vector = match (query_embedding, doc.embedding.as_deref()) {
                (Some(q), Some(d)) if vector_available => cosine_similarity(q, d).max(0.0),
                _ => 0.0,
            };

            if fts <= 0.0 && vector <= 0.0 {
                continue;
            }

            let recency = recency_score(doc.effective_at, now, self.config.half_life_days);

            let combined = if vector_available {
                self.config.fts_weight * fts
                    + self.config.vector_weight * vector
                    + self.config.recency_weight * recency
            } else {
                // degraded: full-text only
                fts
            };

            if combined < query.min_score {
                continue;
            }

            hits.push(RetrievalHit {
                doc_id: doc.doc_id.clone(),
                content: doc.content.clone(),
                scores: ScoreBreakdown {
                    fts,
                    vector,
                    recency,
                    combined,
                },
                vector_available,
            });
        }

        hits.sort_by(|a, b| {
            b.scores
                .combined
                .partial_cmp(&a.scores.combined)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(query.top_k);
        hits
    }
}
