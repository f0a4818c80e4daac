//! Engine configuration.
//!
//! Every tunable that used to be a scattered literal lives here:
//! similarity thresholds, retry limits, scorer weights, timeouts and the
//! wrapper-overhead budgets the performance suite enforces. Engines take
//! the relevant section by reference; nothing reads a threshold from
//! anywhere else.

use crate::feedback::AnonymousPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub golden: GoldenConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub streaming: StreamingConfig,
    pub feedback: FeedbackConfig,
    pub retrieval: RetrievalConfig,
    pub budgets: BudgetConfig,
}

impl Config {
    /// Parse from TOML. Missing sections and keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Load from a TOML file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&raw)?)
    }

    /// Load from `$NORMA_CONFIG` when set, defaults otherwise.
    pub fn load() -> Self {
        match std::env::var("NORMA_CONFIG") {
            Ok(path) => Self::load_from(Path::new(&path)).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}

/// Golden fast path tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldenConfig {
    pub enabled: bool,
    /// Eligibility gate: question length bounds.
    pub min_question_chars: usize,
    pub max_question_chars: usize,
    /// Similarity at or above this serves immediately, no LLM.
    pub high_confidence: f64,
    /// Similarity in [low, high) serves after the KB delta check.
    pub low_confidence: f64,
    pub top_k: usize,
    /// Budget for the regulatory-change check on the low-confidence path.
    pub kb_delta_timeout_ms: u64,
}

impl Default for GoldenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_question_chars: 8,
            max_question_chars: 2000,
            high_confidence: 0.95,
            low_confidence: 0.70,
            top_k: 3,
            kb_delta_timeout_ms: 1500,
        }
    }
}

/// Response cache tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
            timeout_ms: 250,
        }
    }
}

/// LLM invocation tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Preferred provider name; first registered provider when absent.
    pub provider: String,
    pub model: String,
    pub timeout_ms: u64,
    /// Retries after the first attempt, retryable failures only.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "primary".into(),
            model: "norma-chat-1".into(),
            timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

/// Tool execution tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub per_tool_timeout_ms: u64,
    pub max_results_per_source: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            per_tool_timeout_ms: 4000,
            max_results_per_source: 5,
        }
    }
}

/// Streamed delivery tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub enabled: bool,
    /// Characters per SSE chunk.
    pub chunk_chars: usize,
    /// Sink buffer capacity in frames.
    pub buffer_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_chars: 240,
            buffer_capacity: 64,
        }
    }
}

/// Feedback collection tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub enabled: bool,
    /// Expert submissions below this are rejected at the trust gate.
    pub trust_threshold: f64,
    pub anonymous_policy: AnonymousPolicy,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust_threshold: 0.7,
            anonymous_policy: AnonymousPolicy::Simplified,
        }
    }
}

/// Hybrid scorer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub fts_weight: f64,
    pub vector_weight: f64,
    pub recency_weight: f64,
    /// Recency half-life in days.
    pub half_life_days: f64,
    /// Minimum combined score to keep a hit.
    pub min_score: f64,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fts_weight: 0.40,
            vector_weight: 0.45,
            recency_weight: 0.15,
            half_life_days: 365.0,
            min_score: 0.05,
            top_k: 10,
        }
    }
}

/// P95 wrapper-overhead budgets (orchestrator I/O excluded), in ms.
/// The performance suite samples repeated runs against these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub cache_ms: u64,
    pub llm_wrapper_ms: u64,
    pub tools_ms: u64,
    pub streaming_ms: u64,
    pub provider_selection_ms: u64,
    pub golden_lookup_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            cache_ms: 25,
            llm_wrapper_ms: 400,
            tools_ms: 200,
            streaming_ms: 150,
            provider_selection_ms: 50,
            golden_lookup_ms: 40,
        }
    }
}
