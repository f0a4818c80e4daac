//! Shared types for the Norma answer engine.
//!
//! Everything the engine crates and the (out-of-tree) API adapter agree
//! on lives here: the request state container, the typed step patch,
//! transcript and wire types, configuration, and ranked retrieval.

pub mod config;
pub mod error;
pub mod feedback;
pub mod golden;
pub mod llm;
pub mod messages;
pub mod patch;
pub mod retrieval;
pub mod sse;
pub mod state;

pub use config::Config;
pub use error::InfraError;
pub use messages::{fingerprint, latest_user_text, ChatMessage, Role};
pub use patch::StepPatch;
pub use state::{
    deep_merge, AnswerOrigin, AnswerRecord, ProcessingStage, RequestState, Subsystem,
};
