//! Norma answer engine.
//!
//! Step-based orchestration for regulatory Q&A: a golden fast path over
//! vetted answers, a fail-open response cache, LLM invocation with
//! bounded retry and tool use, SSE delivery and a trust-gated feedback
//! pass. The HTTP adapter, persistence and provider clients live
//! outside this crate behind the traits in [`providers`].

pub mod engine;
pub mod pipeline;
pub mod providers;
pub mod step;

pub use pipeline::{AnswerRequest, Collaborators, Pipeline};
pub use step::{apply_patch, run_step, Step};

/// Install the process-wide tracing subscriber. Called once by the
/// embedding binary; honors `RUST_LOG`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
