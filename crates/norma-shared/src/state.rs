//! Request state container.
//!
//! One `RequestState` is created per request, mutated only through the
//! step adapter, and dropped after delivery (and any feedback pass).
//! Nested subsystem maps are never replaced wholesale: step results are
//! deep-merged so earlier information is never silently lost.

use crate::llm::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Processing stage of the request, for logs and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Received,
    Golden,
    Cache,
    Llm,
    Tools,
    Delivery,
    Feedback,
    Done,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Received => "received",
            ProcessingStage::Golden => "golden",
            ProcessingStage::Cache => "cache",
            ProcessingStage::Llm => "llm",
            ProcessingStage::Tools => "tools",
            ProcessingStage::Delivery => "delivery",
            ProcessingStage::Feedback => "feedback",
            ProcessingStage::Done => "done",
        }
    }
}

/// Nested map a step result lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Golden,
    Cache,
    Llm,
    Tools,
    Streaming,
}

impl Subsystem {
    /// Fixed scan order for the flat read adapter.
    pub const ALL: [Subsystem; 5] = [
        Subsystem::Golden,
        Subsystem::Cache,
        Subsystem::Llm,
        Subsystem::Tools,
        Subsystem::Streaming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Golden => "golden",
            Subsystem::Cache => "cache",
            Subsystem::Llm => "llm",
            Subsystem::Tools => "tools",
            Subsystem::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the delivered answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOrigin {
    /// Vetted golden answer, zero LLM calls.
    Golden,
    /// Response cache hit, zero LLM calls.
    Cache,
    /// LLM invocation (possibly after tool use).
    Llm,
    /// Degraded answer after every other path was exhausted.
    Fallback,
}

impl AnswerOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerOrigin::Golden => "golden",
            AnswerOrigin::Cache => "cache",
            AnswerOrigin::Llm => "llm",
            AnswerOrigin::Fallback => "fallback",
        }
    }
}

/// The top-level response copied out of whichever engine produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub content: String,
    pub citations: Vec<String>,
    pub origin: AnswerOrigin,
    pub usage: Option<TokenUsage>,
}

impl AnswerRecord {
    pub fn new(origin: AnswerOrigin, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            citations: vec![],
            origin,
            usage: None,
        }
    }

    pub fn with_citations(mut self, citations: Vec<String>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Canonical mutable record threaded through every step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestState {
    pub request_id: String,
    pub session_id: Option<String>,
    pub stage: ProcessingStage,
    pub complete: bool,
    /// Ordered step names, append-only. Execution order is the audit trail.
    node_history: Vec<String>,
    /// Per-step timings and counters.
    metrics: Map<String, Value>,
    golden: Map<String, Value>,
    cache: Map<String, Value>,
    llm: Map<String, Value>,
    tools: Map<String, Value>,
    streaming: Map<String, Value>,
    /// Global decision log, one entry per branch outcome.
    decisions: Map<String, Value>,
    pub answer: Option<AnswerRecord>,
}

impl RequestState {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
            stage: ProcessingStage::Received,
            complete: false,
            node_history: vec![],
            metrics: Map::new(),
            golden: Map::new(),
            cache: Map::new(),
            llm: Map::new(),
            tools: Map::new(),
            streaming: Map::new(),
            decisions: Map::new(),
            answer: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Append a visited step. There is deliberately no removal API.
    pub fn record_visit(&mut self, step: &str) {
        self.node_history.push(step.to_string());
    }

    pub fn history(&self) -> &[String] {
        &self.node_history
    }

    pub fn metrics(&self) -> &Map<String, Value> {
        &self.metrics
    }

    pub fn record_metric(&mut self, key: &str, value: impl Into<Value>) {
        self.metrics.insert(key.to_string(), value.into());
    }

    pub fn subsystem(&self, sub: Subsystem) -> &Map<String, Value> {
        match sub {
            Subsystem::Golden => &self.golden,
            Subsystem::Cache => &self.cache,
            Subsystem::Llm => &self.llm,
            Subsystem::Tools => &self.tools,
            Subsystem::Streaming => &self.streaming,
        }
    }

    fn subsystem_mut(&mut self, sub: Subsystem) -> &mut Map<String, Value> {
        match sub {
            Subsystem::Golden => &mut self.golden,
            Subsystem::Cache => &mut self.cache,
            Subsystem::Llm => &mut self.llm,
            Subsystem::Tools => &mut self.tools,
            Subsystem::Streaming => &mut self.streaming,
        }
    }

    /// Deep-merge a step result into one subsystem map.
    pub fn merge_subsystem(&mut self, sub: Subsystem, patch: &Map<String, Value>) {
        deep_merge(self.subsystem_mut(sub), patch);
    }

    /// Deep-merge branch outcomes into the decision log.
    pub fn merge_decisions(&mut self, patch: &Map<String, Value>) {
        deep_merge(&mut self.decisions, patch);
    }

    pub fn decisions(&self) -> &Map<String, Value> {
        &self.decisions
    }

    pub fn decision(&self, key: &str) -> Option<&Value> {
        self.decisions.get(key)
    }

    /// Branch outcome as a bool, false when absent or non-boolean.
    pub fn decided(&self, key: &str) -> bool {
        self.decisions.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Read-time adapter for legacy flat keys.
    ///
    /// v0.3.0: replaced write-time mirroring. Values are written once,
    /// into their canonical nested slot; legacy names resolve here.
    /// `golden_served` resolves to `golden.served`; a bare key like
    /// `served_without_kb_context` is found by scanning the subsystem
    /// maps in fixed order, then the decision log. There is exactly one
    /// write location per value.
    pub fn flat(&self, key: &str) -> Option<&Value> {
        for sub in Subsystem::ALL {
            let map = self.subsystem(sub);
            if let Some(rest) = key
                .strip_prefix(sub.as_str())
                .and_then(|r| r.strip_prefix('_'))
            {
                if let Some(v) = map.get(rest) {
                    return Some(v);
                }
            }
            if let Some(v) = map.get(key) {
                return Some(v);
            }
        }
        self.decisions.get(key)
    }

    /// Flat bool read, false when absent.
    pub fn flat_flag(&self, key: &str) -> bool {
        self.flat(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Key-union merge; nested objects merge recursively, leaf conflicts are
/// replaced by the incoming value.
pub fn deep_merge(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (key, incoming) in src {
        if let Some(existing) = dst.get_mut(key) {
            match (existing, incoming) {
                (Value::Object(e), Value::Object(i)) => deep_merge(e, i),
                (e, i) => *e = i.clone(),
            }
        } else {
            dst.insert(key.clone(), incoming.clone());
        }
    }
}
