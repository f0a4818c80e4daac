//! Feedback collection domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Destination a piece of feedback is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Suggests a new or corrected FAQ entry.
    Faq,
    /// Flags a gap or error in the knowledge base.
    Knowledge,
    /// Expert correction, gated on the reviewer's trust score.
    Expert,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Faq => "faq",
            FeedbackKind::Knowledge => "knowledge",
            FeedbackKind::Expert => "expert",
        }
    }
}

/// What anonymous users are offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymousPolicy {
    /// Full feedback form.
    Full,
    /// Simplified two-option form (helpful / not helpful).
    Simplified,
    /// No feedback UI at all.
    Excluded,
}

/// Feedback UI variant shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiVariant {
    Full,
    Simplified,
}

/// What the client submitted after delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackInput {
    pub response_id: Option<String>,
    /// Submitted through the expert-review surface.
    #[serde(default)]
    pub expert: bool,
    pub explicit_kind: Option<FeedbackKind>,
    pub comment: Option<String>,
    /// 1-5, simplified UI submits 1 or 5.
    pub rating: Option<u8>,
    #[serde(default)]
    pub anonymous: bool,
    /// Reviewer trust score, present for expert submissions.
    pub trust_score: Option<f64>,
}

impl FeedbackInput {
    /// Whether anything was actually submitted.
    pub fn has_content(&self) -> bool {
        self.rating.is_some() || self.comment.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Accepted feedback as persisted by the feedback store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub record_id: String,
    pub response_id: String,
    pub kind: FeedbackKind,
    pub comment: Option<String>,
    pub rating: Option<u8>,
    pub trust_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Terminal outcome of the feedback pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// UI not shown or nothing submitted.
    Skipped { reason: String },
    /// Record created.
    Recorded { record_id: String, kind: FeedbackKind },
    /// Expert input discarded at the trust gate. Reason and score are
    /// preserved for audit.
    Rejected { reason: String, trust_score: f64 },
    /// Store failure while creating the record.
    Failed { reason: String },
}
