//! The answer engines: each one is a step (or a post-delivery state
//! machine) wired together by the pipeline.

pub mod cache;
pub mod feedback;
pub mod golden;
pub mod llm;
pub mod streaming;
pub mod tools;

pub use cache::{CacheCheckStep, CacheWriteStep};
pub use feedback::FeedbackEngine;
pub use golden::GoldenStep;
pub use llm::{LlmInvokeStep, RetryCheckStep};
pub use streaming::StreamDeliveryStep;
pub use tools::{ToolExecStep, ToolRegistry};
