//! Pipeline executor.
//!
//! Owns the single source of truth (the request state) and drives the
//! step sequence routing selects: golden fast path, cache, LLM with
//! tool rounds and bounded retry, delivery, then the optional feedback
//! pass. One pipeline instance serves one request; cross-request
//! concurrency is many independent pipelines on the runtime.

use crate::engine::{
    CacheCheckStep, CacheWriteStep, FeedbackEngine, GoldenStep, LlmInvokeStep, RetryCheckStep,
    StreamDeliveryStep, ToolExecStep, ToolRegistry,
};
use crate::providers::{
    CacheClient, EmbeddingProvider, FeedbackStore, GoldenStore, KbDeltaSource, LlmProvider,
    StreamSink,
};
use crate::step::{apply_patch, run_step};
use norma_shared::config::Config;
use norma_shared::feedback::{FeedbackInput, FeedbackOutcome};
use norma_shared::messages::ChatMessage;
use norma_shared::patch::StepPatch;
use norma_shared::state::{
    AnswerOrigin, AnswerRecord, ProcessingStage, RequestState, Subsystem,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Tool rounds per request. One round covers every call in the
/// request; a model that keeps asking for tools after that is treated
/// as a failed invocation.
const MAX_TOOL_ROUNDS: u32 = 2;

/// Hard ceiling on invoke iterations, above any legal combination of
/// retries and tool rounds.
const MAX_LLM_ITERATIONS: u32 = 8;

/// Everything the engine talks to over I/O.
pub struct Collaborators {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub golden_store: Arc<dyn GoldenStore>,
    pub kb_delta: Arc<dyn KbDeltaSource>,
    pub cache: Arc<dyn CacheClient>,
    pub llm_providers: Vec<Arc<dyn LlmProvider>>,
    pub tools: ToolRegistry,
    pub feedback_store: Arc<dyn FeedbackStore>,
    pub sink: Arc<dyn StreamSink>,
}

/// One incoming question.
pub struct AnswerRequest {
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Client asked for SSE delivery.
    pub stream: bool,
}

impl AnswerRequest {
    pub fn question(question: impl Into<String>) -> Self {
        Self {
            request_id: None,
            session_id: None,
            messages: vec![ChatMessage::user(question)],
            stream: false,
        }
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }
}

pub struct Pipeline {
    golden: GoldenStep,
    cache_check: CacheCheckStep,
    cache_write: CacheWriteStep,
    llm_invoke: LlmInvokeStep,
    retry_check: RetryCheckStep,
    tool_exec: ToolExecStep,
    delivery: StreamDeliveryStep,
    feedback: FeedbackEngine,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, collab: Collaborators) -> Self {
        let tools = Arc::new(collab.tools);
        Self {
            golden: GoldenStep::new(
                collab.golden_store,
                collab.embedder,
                collab.kb_delta,
                config.clone(),
            ),
            cache_check: CacheCheckStep::new(collab.cache.clone(), config.clone()),
            cache_write: CacheWriteStep::new(collab.cache, config.clone()),
            llm_invoke: LlmInvokeStep::new(collab.llm_providers, config.clone()),
            retry_check: RetryCheckStep::new(config.clone()),
            tool_exec: ToolExecStep::new(tools, config.clone()),
            delivery: StreamDeliveryStep::new(collab.sink, config.clone()),
            feedback: FeedbackEngine::new(collab.feedback_store, config),
        }
    }

    /// Process one request to completion and return the final state.
    pub async fn run(&self, request: AnswerRequest) -> RequestState {
        let request_id = request
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut state = RequestState::new(request_id);
        if let Some(session_id) = request.session_id {
            state = state.with_session(session_id);
        }
        let mut seed = Map::new();
        seed.insert("requested".into(), json!(request.stream));
        state.merge_subsystem(Subsystem::Streaming, &seed);

        info!("[*]  request {} started", state.request_id);
        let messages = request.messages;

        // golden fast path: vetted answer before any LLM spend
        state.stage = ProcessingStage::Golden;
        run_step(&self.golden, &messages, &mut state).await;
        if state.flat_flag("golden_served") {
            self.deliver(&messages, &mut state).await;
            return state;
        }

        // response cache
        state.stage = ProcessingStage::Cache;
        run_step(&self.cache_check, &messages, &mut state).await;
        if state.decided("cache_hit") {
            self.deliver(&messages, &mut state).await;
            return state;
        }

        // LLM with tool rounds and bounded retry
        state.stage = ProcessingStage::Llm;
        let mut tool_rounds = 0u32;
        let mut answered = false;
        for _ in 0..MAX_LLM_ITERATIONS {
            run_step(&self.llm_invoke, &messages, &mut state).await;

            if state.decided("llm_success") {
                answered = true;
                break;
            }

            if Self::has_pending_tool_calls(&state) {
                if tool_rounds >= MAX_TOOL_ROUNDS {
                    info!("[*]  tool round budget exhausted, giving up on tools");
                    break;
                }
                tool_rounds += 1;
                run_step(&self.tool_exec, &messages, &mut state).await;
                continue;
            }

            run_step(&self.retry_check, &messages, &mut state).await;
            if !state.decided("llm_retry") {
                break;
            }
        }

        if answered {
            run_step(&self.cache_write, &messages, &mut state).await;
        } else {
            self.fallback_answer(&mut state);
        }

        self.deliver(&messages, &mut state).await;
        state
    }

    /// Feedback pass, strictly after delivery. Call once per submitted
    /// (or absent) feedback form.
    pub async fn collect_feedback(
        &self,
        state: &mut RequestState,
        input: FeedbackInput,
    ) -> FeedbackOutcome {
        info!("[>]  feedback_collect enter request={}", state.request_id);
        let started = Instant::now();
        let (patch, outcome) = self.feedback.collect(&input, state).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        apply_patch(state, "feedback_collect", Subsystem::Streaming, patch);
        state.record_metric("feedback_collect_ms", elapsed_ms);
        info!("[<]  feedback_collect exit elapsed_ms={}", elapsed_ms);
        outcome
    }

    async fn deliver(&self, messages: &[ChatMessage], state: &mut RequestState) {
        state.stage = ProcessingStage::Delivery;
        run_step(&self.delivery, messages, state).await;
        info!(
            "[+]  request {} finished origin={} complete={}",
            state.request_id,
            state
                .answer
                .as_ref()
                .map(|a| a.origin.as_str())
                .unwrap_or("none"),
            state.complete
        );
    }

    fn has_pending_tool_calls(state: &RequestState) -> bool {
        state
            .subsystem(Subsystem::Llm)
            .get("pending_tool_calls")
            .and_then(Value::as_array)
            .is_some_and(|calls| !calls.is_empty())
    }

    /// Every fallback is exhausted: an explicit degraded answer, built
    /// from partial tool results when any exist.
    fn fallback_answer(&self, state: &mut RequestState) {
        let mut content = String::from(
            "I could not produce a verified answer to this question right now. \
             Please try again shortly or contact an advisor.",
        );
        let mut citations = vec![];

        if let Some(entries) = state
            .subsystem(Subsystem::Tools)
            .get("results")
            .and_then(Value::as_object)
        {
            let mut passages = vec![];
            for entry in entries.values() {
                if let Some(results) = entry.get("results").and_then(Value::as_array) {
                    for r in results {
                        if let (Some(source), Some(text)) = (
                            r.get("source_id").and_then(Value::as_str),
                            r.get("content").and_then(Value::as_str),
                        ) {
                            passages.push(format!("- [{source}] {text}"));
                            citations.push(source.to_string());
                        }
                    }
                }
            }
            if !passages.is_empty() {
                content = format!(
                    "I could not complete a full answer, but the following source \
                     passages are relevant:\n{}",
                    passages.join("\n")
                );
            }
        }

        let patch = StepPatch::new()
            .decision("fallback_answer", true)
            .answer(AnswerRecord::new(AnswerOrigin::Fallback, content).with_citations(citations));
        apply_patch(state, "fallback_answer", Subsystem::Llm, patch);
    }
}
