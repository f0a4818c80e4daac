//! LLM invocation and retry classification.
//!
//! One invocation per step run: select a provider, call it under the
//! configured timeout, classify the outcome. Tool-use requests are
//! surfaced for the tool engine instead of final content. The retry
//! check is its own step so the branch is visible in the decision log.

use crate::providers::{LlmProvider, ToolResult};
use crate::step::Step;
use async_trait::async_trait;
use norma_shared::config::Config;
use norma_shared::llm::{LlmFailure, ToolCall};
use norma_shared::messages::ChatMessage;
use norma_shared::patch::StepPatch;
use norma_shared::state::{
    AnswerOrigin, AnswerRecord, ProcessingStage, RequestState, Subsystem,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct LlmInvokeStep {
    providers: Vec<Arc<dyn LlmProvider>>,
    config: Arc<Config>,
}

impl LlmInvokeStep {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, config: Arc<Config>) -> Self {
        Self { providers, config }
    }

    /// Pick the provider for this attempt: the configured one first,
    /// each failure advances through the remaining registrations so a
    /// persistently failing primary does not eat the whole retry
    /// budget.
    ///
    /// v0.5.1: rotation keys off the failure count, not the attempt
    /// count. Tool follow-up calls stay on the provider that asked.
    fn select_provider(&self, failures: u64) -> Option<&Arc<dyn LlmProvider>> {
        if self.providers.is_empty() {
            return None;
        }
        let preferred = self
            .providers
            .iter()
            .position(|p| p.name() == self.config.llm.provider)
            .unwrap_or(0);
        let mut order: Vec<usize> = Vec::with_capacity(self.providers.len());
        order.push(preferred);
        order.extend((0..self.providers.len()).filter(|i| *i != preferred));
        let slot = (failures as usize).min(order.len() - 1);
        self.providers.get(order[slot])
    }

    /// Tool outputs already gathered this request, appended as tool
    /// turns for the follow-up invocation.
    fn tool_context(ctx: &RequestState) -> Vec<ChatMessage> {
        let Some(results) = ctx.subsystem(Subsystem::Tools).get("results") else {
            return vec![];
        };
        let Some(entries) = results.as_object() else {
            return vec![];
        };
        let mut turns = vec![];
        for (call_id, entry) in entries {
            let kind = entry.get("kind").and_then(Value::as_str).unwrap_or("tool");
            let passages: Vec<String> = entry
                .get("results")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|r| {
                            let source = r.get("source_id").and_then(Value::as_str)?;
                            let content = r.get("content").and_then(Value::as_str)?;
                            Some(format!("[{source}] {content}"))
                        })
                        .collect()
                })
                .unwrap_or_default();
            if passages.is_empty() {
                continue;
            }
            turns.push(ChatMessage::tool(format!(
                "{} results for call {}:\n{}",
                kind,
                call_id,
                passages.join("\n")
            )));
        }
        turns
    }

    /// Citations for an answer assembled after tool use.
    fn tool_citations(ctx: &RequestState) -> Vec<String> {
        let mut citations: Vec<String> = vec![];
        if let Some(entries) = ctx
            .subsystem(Subsystem::Tools)
            .get("results")
            .and_then(Value::as_object)
        {
            for entry in entries.values() {
                if let Some(results) = entry.get("results").and_then(Value::as_array) {
                    for r in results {
                        if let Some(source) = r.get("source_id").and_then(Value::as_str) {
                            if !citations.iter().any(|c| c == source) {
                                citations.push(source.to_string());
                            }
                        }
                    }
                }
            }
        }
        citations
    }

    fn failure_patch(attempts: u64, failures: u64, failure: LlmFailure) -> StepPatch {
        warn!(
            "[L]  invocation failed attempt={} retryable={} message={}",
            attempts, failure.retryable, failure.message
        );
        let mut extra = Map::new();
        extra.insert("attempts".into(), json!(attempts));
        extra.insert("failure_count".into(), json!(failures));
        extra.insert("failure".into(), json!(failure));
        StepPatch::new()
            .extra(Subsystem::Llm, extra)
            .decision("llm_success", false)
    }
}

#[async_trait]
impl Step for LlmInvokeStep {
    fn name(&self) -> &'static str {
        "llm_invoke"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Llm
    }

    async fn run(&self, messages: &[ChatMessage], ctx: &RequestState) -> StepPatch {
        let llm = ctx.subsystem(Subsystem::Llm);
        let attempts = llm.get("attempts").and_then(Value::as_u64).unwrap_or(0) + 1;
        let failures = llm
            .get("failure_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let Some(provider) = self.select_provider(failures) else {
            return Self::failure_patch(
                attempts,
                failures + 1,
                LlmFailure {
                    status_code: None,
                    message: "no providers registered".into(),
                    retryable: false,
                },
            );
        };

        let mut transcript: Vec<ChatMessage> = messages.to_vec();
        transcript.extend(Self::tool_context(ctx));

        info!(
            "[L]  invoking provider={} model={} attempt={}",
            provider.name(),
            provider.model(),
            attempts
        );

        let budget = Duration::from_millis(self.config.llm.timeout_ms);
        let reply = match tokio::time::timeout(budget, provider.chat(&transcript)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                return Self::failure_patch(
                    attempts,
                    failures + 1,
                    LlmFailure {
                        status_code: e.status_code(),
                        message: e.to_string(),
                        retryable: e.retryable(),
                    },
                )
            }
            Err(_) => {
                return Self::failure_patch(
                    attempts,
                    failures + 1,
                    LlmFailure {
                        status_code: None,
                        message: format!("timed out after {}ms", self.config.llm.timeout_ms),
                        retryable: true,
                    },
                )
            }
        };

        let mut extra = Map::new();
        extra.insert("attempts".into(), json!(attempts));
        extra.insert("provider".into(), json!(provider.name()));
        extra.insert("model".into(), json!(provider.model()));
        extra.insert("usage".into(), json!(reply.usage));

        if reply.wants_tools() {
            info!("[L]  model requested {} tool call(s)", reply.tool_calls.len());
            extra.insert("pending_tool_calls".into(), json!(reply.tool_calls));
            return StepPatch::new()
                .extra(Subsystem::Llm, extra)
                .decision("llm_tool_use", true)
                .stage(ProcessingStage::Tools);
        }

        let content = reply.content.unwrap_or_default();
        if content.is_empty() {
            return Self::failure_patch(
                attempts,
                failures + 1,
                LlmFailure {
                    status_code: None,
                    message: "provider returned empty content".into(),
                    retryable: true,
                },
            );
        }

        info!("[L]  invocation succeeded ({} chars)", content.len());
        let citations = Self::tool_citations(ctx);
        let answer = AnswerRecord::new(AnswerOrigin::Llm, content.clone())
            .with_citations(citations)
            .with_usage(reply.usage);

        StepPatch::new()
            .set("response", content)
            .extra(Subsystem::Llm, extra)
            .decision("llm_success", true)
            .answer(answer)
            .stage(ProcessingStage::Delivery)
    }
}

/// Consults the classified failure and the attempt counter.
pub struct RetryCheckStep {
    config: Arc<Config>,
}

impl RetryCheckStep {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Step for RetryCheckStep {
    fn name(&self) -> &'static str {
        "llm_retry_check"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Llm
    }

    async fn run(&self, _messages: &[ChatMessage], ctx: &RequestState) -> StepPatch {
        let llm = ctx.subsystem(Subsystem::Llm);
        let attempts = llm.get("attempts").and_then(Value::as_u64).unwrap_or(0);
        let retryable = llm
            .get("failure")
            .and_then(|f| f.get("retryable"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let allowed = retryable && attempts <= u64::from(self.config.llm.max_retries);
        info!(
            "[L]  retry check attempts={} retryable={} allowed={}",
            attempts, retryable, allowed
        );

        StepPatch::new()
            .set("retry_allowed", allowed)
            .decision("llm_retry", allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::run_step;
    use norma_shared::error::InfraError;
    use norma_shared::llm::{LlmReply, TokenUsage, ToolKind};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ScriptedProvider {
        name: &'static str,
        replies: Vec<Result<LlmReply, InfraError>>,
        calls: AtomicU64,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, replies: Vec<Result<LlmReply, InfraError>>) -> Self {
            Self {
                name,
                replies,
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn chat(&self, _messages: &[ChatMessage]) -> Result<LlmReply, InfraError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.replies
                .get(call.min(self.replies.len().saturating_sub(1)))
                .cloned()
                .unwrap_or(Err(InfraError::Unavailable("script exhausted".into())))
        }
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::user("is a probation clause valid in a fixed-term contract?")]
    }

    #[tokio::test]
    async fn test_success_sets_answer_and_usage() {
        let provider = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Ok(LlmReply::content(
                "Only for contracts of six months or longer.",
                TokenUsage {
                    prompt_tokens: 40,
                    completion_tokens: 12,
                },
            ))],
        ));
        let step = LlmInvokeStep::new(vec![provider], Arc::new(Config::default()));

        let mut state = RequestState::new("req-1");
        run_step(&step, &messages(), &mut state).await;

        assert!(state.decided("llm_success"));
        let answer = state.answer.as_ref().unwrap();
        assert_eq!(answer.origin, AnswerOrigin::Llm);
        assert_eq!(answer.usage.unwrap().total(), 52);
        assert_eq!(
            state.subsystem(Subsystem::Llm).get("attempts"),
            Some(&json!(1))
        );
    }

    #[tokio::test]
    async fn test_tool_use_surfaces_calls() {
        let provider = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Ok(LlmReply::tool_use(
                vec![ToolCall {
                    call_id: "c1".into(),
                    kind: ToolKind::KnowledgeBase,
                    query: "probation clause fixed-term".into(),
                }],
                TokenUsage::default(),
            ))],
        ));
        let step = LlmInvokeStep::new(vec![provider], Arc::new(Config::default()));

        let mut state = RequestState::new("req-1");
        run_step(&step, &messages(), &mut state).await;

        assert!(state.decided("llm_tool_use"));
        assert!(!state.decided("llm_success"));
        assert!(state.answer.is_none());
        let pending = state
            .subsystem(Subsystem::Llm)
            .get("pending_tool_calls")
            .unwrap();
        assert_eq!(pending.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retryable() {
        let provider = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Err(InfraError::backend(401, "bad key"))],
        ));
        let config = Arc::new(Config::default());
        let invoke = LlmInvokeStep::new(vec![provider], config.clone());
        let retry = RetryCheckStep::new(config);

        let mut state = RequestState::new("req-1");
        run_step(&invoke, &messages(), &mut state).await;
        assert!(!state.decided("llm_success"));

        run_step(&retry, &messages(), &mut state).await;
        assert!(!state.decided("llm_retry"));

        let failure = state.subsystem(Subsystem::Llm).get("failure").unwrap();
        assert_eq!(failure["status_code"], json!(401));
        assert_eq!(failure["retryable"], json!(false));
    }

    #[tokio::test]
    async fn test_server_failure_retryable_until_budget() {
        let provider = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Err(InfraError::backend(503, "overloaded"))],
        ));
        let config = Arc::new(Config::default()); // max_retries = 2
        let invoke = LlmInvokeStep::new(vec![provider], config.clone());
        let retry = RetryCheckStep::new(config);

        let mut state = RequestState::new("req-1");

        // attempts 1 and 2 may retry, attempt 3 exhausts the budget
        for expected in [true, true, false] {
            run_step(&invoke, &messages(), &mut state).await;
            run_step(&retry, &messages(), &mut state).await;
            assert_eq!(state.decided("llm_retry"), expected);
        }
        assert_eq!(
            state.subsystem(Subsystem::Llm).get("attempts"),
            Some(&json!(3))
        );
    }

    #[tokio::test]
    async fn test_retry_rotates_to_fallback_provider() {
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Err(InfraError::backend(500, "boom"))],
        ));
        let fallback = Arc::new(ScriptedProvider::new(
            "fallback",
            vec![Ok(LlmReply::content("recovered", TokenUsage::default()))],
        ));
        let step = LlmInvokeStep::new(vec![primary, fallback], Arc::new(Config::default()));

        let mut state = RequestState::new("req-1");
        run_step(&step, &messages(), &mut state).await;
        assert!(!state.decided("llm_success"));

        run_step(&step, &messages(), &mut state).await;
        assert!(state.decided("llm_success"));
        assert_eq!(
            state.subsystem(Subsystem::Llm).get("provider"),
            Some(&json!("fallback"))
        );
    }

    #[tokio::test]
    async fn test_timeout_is_retryable_failure() {
        struct SlowProvider;

        #[async_trait]
        impl LlmProvider for SlowProvider {
            fn name(&self) -> &str {
                "slow"
            }

            fn model(&self) -> &str {
                "m"
            }

            async fn chat(&self, _messages: &[ChatMessage]) -> Result<LlmReply, InfraError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(LlmReply::content("late", TokenUsage::default()))
            }
        }

        let mut config = Config::default();
        config.llm.timeout_ms = 50;
        let step = LlmInvokeStep::new(vec![Arc::new(SlowProvider)], Arc::new(config));

        let mut state = RequestState::new("req-1");
        run_step(&step, &messages(), &mut state).await;

        let failure = state.subsystem(Subsystem::Llm).get("failure").unwrap();
        assert_eq!(failure["retryable"], json!(true));
        assert!(failure["message"].as_str().unwrap().contains("timed out"));
    }
}
