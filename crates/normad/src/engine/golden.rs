//! Golden fast path.
//!
//! Tries to answer from the vetted answer store before paying for an
//! LLM call. Flow: gate (cheap eligibility) → lookup (hybrid similarity
//! against the store) → serve, optionally after a regulatory-change
//! check on the low-confidence band. Every non-serve exit records an
//! explicit fallback cause; there is no silent no-match.

use crate::providers::{EmbeddingProvider, GoldenStore, KbDeltaSource};
use crate::step::Step;
use async_trait::async_trait;
use norma_shared::config::Config;
use norma_shared::golden::{GoldenAnswer, GoldenMatch, MatchConfidence, RegulatoryDelta};
use norma_shared::messages::{latest_user_text, ChatMessage};
use norma_shared::patch::StepPatch;
use norma_shared::retrieval::{HybridScorer, RetrievalDoc, RetrievalQuery};
use norma_shared::state::{
    AnswerOrigin, AnswerRecord, ProcessingStage, RequestState, Subsystem,
};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct GoldenStep {
    store: Arc<dyn GoldenStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    kb_delta: Arc<dyn KbDeltaSource>,
    config: Arc<Config>,
}

impl GoldenStep {
    pub fn new(
        store: Arc<dyn GoldenStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        kb_delta: Arc<dyn KbDeltaSource>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            embedder,
            kb_delta,
            config,
        }
    }

    /// Cheap gate run before any similarity search. Length bounds plus
    /// a minimal shape check; anything borderline goes to lookup.
    fn eligible(&self, question: &str) -> bool {
        let golden = &self.config.golden;
        let trimmed = question.trim();
        trimmed.len() >= golden.min_question_chars
            && trimmed.len() <= golden.max_question_chars
            && trimmed.split_whitespace().count() >= 2
            && trimmed.chars().any(|c| c.is_alphabetic())
    }

    /// Non-serve exit: route to the LLM with an explicit cause.
    fn fallback(&self, eligible: bool, cause: &str, detail: Option<String>) -> StepPatch {
        info!("[G]  fallback to llm cause={}", cause);
        let mut extra = Map::new();
        extra.insert("fallback_cause".into(), json!(cause));
        if let Some(detail) = detail {
            extra.insert("fallback_detail".into(), json!(detail));
        }
        StepPatch::new()
            .extra(Subsystem::Golden, extra)
            .decision("golden_eligible", eligible)
            .decision("fallback_to_llm", true)
    }

    fn serve(
        &self,
        matched: GoldenMatch,
        served_without_kb_context: bool,
        deltas: &[RegulatoryDelta],
    ) -> StepPatch {
        info!(
            "[G]  serving golden answer faq_id={} similarity={:.3}",
            matched.faq_id, matched.similarity
        );

        let mut content = matched.answer.clone();
        let mut citations = matched.citations.clone();
        if !deltas.is_empty() {
            content.push_str("\n\nRecent regulatory changes may affect this answer:");
            for delta in deltas {
                content.push_str(&format!("\n- {}: {}", delta.regulation, delta.summary));
                citations.push(delta.regulation.clone());
            }
        }

        let mut extra = Map::new();
        extra.insert("faq_id".into(), json!(matched.faq_id));
        extra.insert("confidence".into(), json!(matched.confidence));
        extra.insert("delta_count".into(), json!(deltas.len()));
        if served_without_kb_context {
            extra.insert("served_without_kb_context".into(), json!(true));
        }

        StepPatch::new()
            .set("golden_served", true)
            .set("match_similarity", matched.similarity)
            .extra(Subsystem::Golden, extra)
            .decision("golden_eligible", true)
            .decision("golden_match", true)
            .decision("golden_served", true)
            .answer(
                AnswerRecord::new(AnswerOrigin::Golden, content).with_citations(citations),
            )
            .stage(ProcessingStage::Delivery)
    }

    /// Regulatory-change check for the low-confidence band. A missing
    /// or slow KB never blocks serving a vetted answer.
    async fn kb_delta_check(
        &self,
        answer: &GoldenAnswer,
        question: &str,
    ) -> (Vec<RegulatoryDelta>, bool) {
        let budget = Duration::from_millis(self.config.golden.kb_delta_timeout_ms);
        match tokio::time::timeout(budget, self.kb_delta.changes_since(answer.effective_at, question))
            .await
        {
            Ok(Ok(deltas)) => {
                debug!("[G]  kb delta check found {} changes", deltas.len());
                (deltas, false)
            }
            Ok(Err(e)) => {
                warn!("[G]  kb delta check unavailable: {}", e);
                (vec![], true)
            }
            Err(_) => {
                warn!(
                    "[G]  kb delta check timed out after {}ms",
                    self.config.golden.kb_delta_timeout_ms
                );
                (vec![], true)
            }
        }
    }
}

#[async_trait]
impl Step for GoldenStep {
    fn name(&self) -> &'static str {
        "golden_fast_path"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Golden
    }

    async fn run(&self, messages: &[ChatMessage], _ctx: &RequestState) -> StepPatch {
        let golden = &self.config.golden;

        if !golden.enabled {
            return self.fallback(false, "disabled", None);
        }

        // GATE
        let Some(question) = latest_user_text(messages) else {
            return self.fallback(false, "no_question", None);
        };
        if !self.eligible(question) {
            return self.fallback(false, "not_eligible", None);
        }

        // LOOKUP: embed, then rank the vetted store
        let query_embedding = match self.embedder.embed(question).await {
            Ok(Some(v)) => v,
            Ok(None) => return self.fallback(true, "embedding_unavailable", None),
            Err(e) => return self.fallback(true, "embedding_failed", Some(e.to_string())),
        };

        let answers = match self.store.vetted_answers().await {
            Ok(answers) => answers,
            Err(e) => return self.fallback(true, "store_unavailable", Some(e.to_string())),
        };
        if answers.is_empty() {
            return self.fallback(true, "empty_store", None);
        }
        if answers.iter().all(|a| a.embedding.is_none()) {
            return self.fallback(true, "missing_embeddings", None);
        }

        let docs = answers
            .iter()
            .map(|a| RetrievalDoc {
                doc_id: a.faq_id.clone(),
                content: a.question.clone(),
                embedding: a.embedding.clone(),
                effective_at: a.effective_at,
            })
            .collect();
        let scorer = HybridScorer::with_docs(self.config.retrieval.clone(), docs);
        let query = RetrievalQuery::new(question).with_top_k(golden.top_k);
        let hits = scorer.rank(&query, Some(query_embedding.as_slice()), chrono::Utc::now());

        let Some(best) = hits.first() else {
            return self.fallback(true, "no_match", None);
        };
        // Confidence bands are defined on vector similarity; the hybrid
        // ranking only picks which candidate to judge.
        let similarity = best.scores.vector;
        let Some(answer) = answers.iter().find(|a| a.faq_id == best.doc_id) else {
            return self.fallback(true, "no_match", None);
        };

        if similarity >= golden.high_confidence {
            let matched = GoldenMatch {
                faq_id: answer.faq_id.clone(),
                answer: answer.answer.clone(),
                citations: answer.citations.clone(),
                similarity,
                confidence: MatchConfidence::High,
            };
            return self.serve(matched, false, &[]);
        }

        if similarity >= golden.low_confidence {
            // KB_CONTEXT_CHECK → KB_DELTA → SERVE
            let (deltas, unavailable) = self.kb_delta_check(answer, question).await;
            let matched = GoldenMatch {
                faq_id: answer.faq_id.clone(),
                answer: answer.answer.clone(),
                citations: answer.citations.clone(),
                similarity,
                confidence: MatchConfidence::Low,
            };
            return self
                .serve(matched, unavailable, &deltas)
                .decision("kb_required", true);
        }

        self.fallback(true, "no_match", None)
            .set("match_similarity", similarity)
    }
}
