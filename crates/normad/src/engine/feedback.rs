//! Feedback collection.
//!
//! Runs strictly after delivery and metrics. Gates the UI on global
//! enablement, response presence and the anonymous-user policy, routes
//! submitted feedback (expert flag wins over an explicit kind, which
//! wins over the contextual signal) and puts expert input through the
//! trust gate. The trust gate is the only point that permanently
//! discards input; a rejection keeps reason and score for audit.

use crate::providers::FeedbackStore;
use async_trait::async_trait;
use norma_shared::config::Config;
use norma_shared::feedback::{
    AnonymousPolicy, FeedbackInput, FeedbackKind, FeedbackOutcome, FeedbackRecord, UiVariant,
};
use norma_shared::patch::StepPatch;
use norma_shared::state::{ProcessingStage, RequestState};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Comment tokens that read as a knowledge-base correction rather than
/// an FAQ suggestion.
const KNOWLEDGE_SIGNALS: &[&str] = &[
    "wrong",
    "incorrect",
    "outdated",
    "missing",
    "stale",
    "superseded",
];

pub struct FeedbackEngine {
    store: Arc<dyn FeedbackStore>,
    config: Arc<Config>,
}

impl FeedbackEngine {
    pub fn new(store: Arc<dyn FeedbackStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// UI gate: is feedback collection on for this response and user?
    fn ui_variant(&self, input: &FeedbackInput, ctx: &RequestState) -> Result<UiVariant, String> {
        if !self.config.feedback.enabled {
            return Err("disabled".into());
        }
        if ctx.answer.is_none() && input.response_id.is_none() {
            return Err("no_response".into());
        }
        if input.anonymous {
            return match self.config.feedback.anonymous_policy {
                AnonymousPolicy::Excluded => Err("anonymous_excluded".into()),
                AnonymousPolicy::Simplified => Ok(UiVariant::Simplified),
                AnonymousPolicy::Full => Ok(UiVariant::Full),
            };
        }
        Ok(UiVariant::Full)
    }

    /// Routing priority: expert surface > explicit kind > contextual
    /// signal from the comment text.
    fn route(input: &FeedbackInput) -> FeedbackKind {
        if input.expert {
            return FeedbackKind::Expert;
        }
        if let Some(kind) = input.explicit_kind {
            return kind;
        }
        let comment = input.comment.as_deref().unwrap_or("").to_lowercase();
        if KNOWLEDGE_SIGNALS.iter().any(|s| comment.contains(s)) {
            FeedbackKind::Knowledge
        } else {
            FeedbackKind::Faq
        }
    }

    /// Drive the state machine. Returns the patch to apply plus the
    /// terminal outcome.
    pub async fn collect(
        &self,
        input: &FeedbackInput,
        ctx: &RequestState,
    ) -> (StepPatch, FeedbackOutcome) {
        let mut patch = StepPatch::new().stage(ProcessingStage::Done);

        // SHOW_UI
        let variant = match self.ui_variant(input, ctx) {
            Ok(variant) => variant,
            Err(reason) => {
                info!("[F]  feedback ui not shown: {}", reason);
                patch = patch
                    .decision("feedback_ui_shown", false)
                    .decision("feedback_skip_reason", reason.clone());
                return (patch, FeedbackOutcome::Skipped { reason });
            }
        };
        patch = patch
            .decision("feedback_ui_shown", true)
            .decision("feedback_ui_variant", serde_json::json!(variant));

        // DECIDE
        if !input.has_content() {
            patch = patch.decision("feedback_given", false);
            return (
                patch,
                FeedbackOutcome::Skipped {
                    reason: "no_feedback".into(),
                },
            );
        }
        patch = patch.decision("feedback_given", true);

        // ROUTE
        let kind = Self::route(input);
        patch = patch.decision("feedback_kind", kind.as_str());

        // TRUST_GATE (expert route only)
        let trust_score = input.trust_score.unwrap_or(0.0);
        if kind == FeedbackKind::Expert {
            if trust_score < self.config.feedback.trust_threshold {
                warn!(
                    "[F]  expert feedback rejected trust={:.2} threshold={:.2}",
                    trust_score, self.config.feedback.trust_threshold
                );
                let reason = "trust_below_threshold".to_string();
                patch = patch
                    .decision("feedback_accepted", false)
                    .decision("feedback_rejection_reason", reason.clone())
                    .decision("feedback_trust_score", trust_score);
                return (patch, FeedbackOutcome::Rejected { reason, trust_score });
            }
            patch = patch.decision("feedback_trust_score", trust_score);
        }

        // CREATE_RECORD
        let response_id = input
            .response_id
            .clone()
            .unwrap_or_else(|| ctx.request_id.clone());
        let record = FeedbackRecord {
            record_id: Uuid::new_v4().to_string(),
            response_id,
            kind,
            comment: input.comment.clone(),
            rating: input.rating,
            trust_score: input.trust_score,
            created_at: chrono::Utc::now(),
        };
        let record_id = record.record_id.clone();

        match self.store.create(record).await {
            Ok(()) => {
                info!("[F]  feedback recorded kind={} id={}", kind.as_str(), record_id);
                patch = patch.decision("feedback_accepted", true);
                (patch, FeedbackOutcome::Recorded { record_id, kind })
            }
            Err(e) => {
                warn!("[F]  feedback store failed: {}", e);
                patch = patch
                    .decision("feedback_accepted", false)
                    .decision("feedback_store_error", true);
                (
                    patch,
                    FeedbackOutcome::Failed {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }
}
