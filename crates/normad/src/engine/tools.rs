//! Tool execution.
//!
//! Dispatches model-requested tool calls to their document sources.
//! Partial failure is first-class: some sources succeeding and others
//! failing is a usable outcome, never a whole-turn failure.

use crate::providers::ToolSource;
use crate::step::Step;
use async_trait::async_trait;
use norma_shared::config::Config;
use norma_shared::llm::{ToolCall, ToolKind};
use norma_shared::messages::ChatMessage;
use norma_shared::patch::StepPatch;
use norma_shared::state::{ProcessingStage, RequestState, Subsystem};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One registered source per tool kind. The closed enum keeps dispatch
/// exhaustive: adding a kind will not compile until it is routed here.
#[derive(Default)]
pub struct ToolRegistry {
    knowledge_base: Option<Arc<dyn ToolSource>>,
    labor_agreement: Option<Arc<dyn ToolSource>>,
    document: Option<Arc<dyn ToolSource>>,
    faq: Option<Arc<dyn ToolSource>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, source: Arc<dyn ToolSource>) -> Self {
        match source.kind() {
            ToolKind::KnowledgeBase => self.knowledge_base = Some(source),
            ToolKind::LaborAgreement => self.labor_agreement = Some(source),
            ToolKind::Document => self.document = Some(source),
            ToolKind::Faq => self.faq = Some(source),
        }
        self
    }

    pub fn source(&self, kind: ToolKind) -> Option<&Arc<dyn ToolSource>> {
        match kind {
            ToolKind::KnowledgeBase => self.knowledge_base.as_ref(),
            ToolKind::LaborAgreement => self.labor_agreement.as_ref(),
            ToolKind::Document => self.document.as_ref(),
            ToolKind::Faq => self.faq.as_ref(),
        }
    }
}

pub struct ToolExecStep {
    registry: Arc<ToolRegistry>,
    config: Arc<Config>,
}

impl ToolExecStep {
    pub fn new(registry: Arc<ToolRegistry>, config: Arc<Config>) -> Self {
        Self { registry, config }
    }

    fn pending_calls(ctx: &RequestState) -> Vec<ToolCall> {
        ctx.subsystem(Subsystem::Llm)
            .get("pending_tool_calls")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Step for ToolExecStep {
    fn name(&self) -> &'static str {
        "tool_exec"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Tools
    }

    async fn run(&self, _messages: &[ChatMessage], ctx: &RequestState) -> StepPatch {
        let calls = Self::pending_calls(ctx);
        if calls.is_empty() {
            let mut extra = Map::new();
            extra.insert("no_calls".into(), json!(true));
            return StepPatch::new().extra(Subsystem::Tools, extra);
        }

        let budget = Duration::from_millis(self.config.tools.per_tool_timeout_ms);
        let limit = self.config.tools.max_results_per_source;

        let mut results = Map::new();
        let mut failed_sources: Vec<String> = vec![];
        let mut any_success = false;
        let mut any_timeout = false;

        for call in &calls {
            let mut entry = Map::new();
            entry.insert("kind".into(), json!(call.kind));
            entry.insert("query".into(), json!(call.query));

            let Some(source) = self.registry.source(call.kind) else {
                warn!("[T]  no source registered for {}", call.kind);
                entry.insert("success".into(), json!(false));
                entry.insert("error".into(), json!("no_source_registered"));
                failed_sources.push(call.kind.as_str().to_string());
                results.insert(call.call_id.clone(), Value::Object(entry));
                continue;
            };

            match tokio::time::timeout(budget, source.search(&call.query, limit)).await {
                Ok(Ok(passages)) => {
                    info!(
                        "[T]  {} returned {} passage(s) for call {}",
                        call.kind,
                        passages.len(),
                        call.call_id
                    );
                    entry.insert("success".into(), json!(true));
                    entry.insert("results".into(), json!(passages));
                    any_success = true;
                }
                Ok(Err(e)) => {
                    warn!("[T]  {} failed: {}", call.kind, e);
                    entry.insert("success".into(), json!(false));
                    entry.insert("error".into(), json!(e.to_string()));
                    failed_sources.push(call.kind.as_str().to_string());
                }
                Err(_) => {
                    warn!(
                        "[T]  {} timed out after {}ms",
                        call.kind, self.config.tools.per_tool_timeout_ms
                    );
                    entry.insert("success".into(), json!(false));
                    entry.insert("timeout".into(), json!(true));
                    failed_sources.push(call.kind.as_str().to_string());
                    any_timeout = true;
                }
            }
            results.insert(call.call_id.clone(), Value::Object(entry));
        }

        let any_failure = !failed_sources.is_empty();
        let tool_success = any_success;
        let partial_failure = any_success && any_failure;

        let mut extra = Map::new();
        extra.insert("tool_success".into(), json!(tool_success));
        extra.insert("partial_failure".into(), json!(partial_failure));
        extra.insert("failed_sources".into(), json!(failed_sources));
        if !tool_success && any_timeout {
            extra.insert("timeout".into(), json!(true));
        }

        // consume the pending calls so the follow-up invocation is not
        // re-routed here
        let mut llm_extra = Map::new();
        llm_extra.insert("pending_tool_calls".into(), Value::Null);

        StepPatch::new()
            .set("tool_results", Value::Object(results))
            .extra(Subsystem::Tools, extra)
            .extra(Subsystem::Llm, llm_extra)
            .decision("tools_success", tool_success)
            .decision("tools_partial_failure", partial_failure)
            .stage(ProcessingStage::Llm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolResult;
    use crate::step::run_step;
    use norma_shared::error::InfraError;

    enum SourceMode {
        Passages(Vec<ToolResult>),
        Error,
        Hang,
    }

    struct FakeSource {
        kind: ToolKind,
        mode: SourceMode,
    }

    #[async_trait]
    impl ToolSource for FakeSource {
        fn kind(&self) -> ToolKind {
            self.kind
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<ToolResult>, InfraError> {
            match &self.mode {
                SourceMode::Passages(p) => Ok(p.clone()),
                SourceMode::Error => Err(InfraError::Unavailable("index offline".into())),
                SourceMode::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(vec![])
                }
            }
        }
    }

    fn passage(source_id: &str) -> ToolResult {
        ToolResult {
            source_id: source_id.to_string(),
            content: "Article 7: overtime is compensated at 150%.".into(),
            score: 0.9,
        }
    }

    fn seed_calls(state: &mut RequestState, calls: &[(&str, ToolKind)]) {
        let calls: Vec<ToolCall> = calls
            .iter()
            .map(|(id, kind)| ToolCall {
                call_id: id.to_string(),
                kind: *kind,
                query: "overtime".into(),
            })
            .collect();
        let mut extra = Map::new();
        extra.insert("pending_tool_calls".into(), json!(calls));
        state.merge_subsystem(Subsystem::Llm, &extra);
    }

    fn fast_config() -> Arc<Config> {
        let mut config = Config::default();
        config.tools.per_tool_timeout_ms = 50;
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_partial_failure_is_usable() {
        let registry = Arc::new(
            ToolRegistry::new()
                .register(Arc::new(FakeSource {
                    kind: ToolKind::KnowledgeBase,
                    mode: SourceMode::Passages(vec![passage("kb-7")]),
                }))
                .register(Arc::new(FakeSource {
                    kind: ToolKind::LaborAgreement,
                    mode: SourceMode::Error,
                })),
        );
        let step = ToolExecStep::new(registry, fast_config());

        let mut state = RequestState::new("req-1");
        seed_calls(
            &mut state,
            &[
                ("c1", ToolKind::KnowledgeBase),
                ("c2", ToolKind::LaborAgreement),
            ],
        );
        run_step(&step, &[], &mut state).await;

        let tools = state.subsystem(Subsystem::Tools);
        assert_eq!(tools.get("tool_success"), Some(&json!(true)));
        assert_eq!(tools.get("partial_failure"), Some(&json!(true)));
        assert_eq!(
            tools.get("failed_sources"),
            Some(&json!(["labor_agreement"]))
        );
        assert!(state.decided("tools_partial_failure"));
    }

    #[tokio::test]
    async fn test_timeout_does_not_crash_pipeline() {
        let registry = Arc::new(ToolRegistry::new().register(Arc::new(FakeSource {
            kind: ToolKind::KnowledgeBase,
            mode: SourceMode::Hang,
        })));
        let step = ToolExecStep::new(registry, fast_config());

        let mut state = RequestState::new("req-1");
        seed_calls(&mut state, &[("c1", ToolKind::KnowledgeBase)]);
        run_step(&step, &[], &mut state).await;

        let tools = state.subsystem(Subsystem::Tools);
        assert_eq!(tools.get("tool_success"), Some(&json!(false)));
        assert_eq!(tools.get("timeout"), Some(&json!(true)));
        assert_eq!(tools.get("partial_failure"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_all_sources_succeed() {
        let registry = Arc::new(
            ToolRegistry::new()
                .register(Arc::new(FakeSource {
                    kind: ToolKind::Faq,
                    mode: SourceMode::Passages(vec![passage("faq-3")]),
                }))
                .register(Arc::new(FakeSource {
                    kind: ToolKind::Document,
                    mode: SourceMode::Passages(vec![passage("doc-1")]),
                })),
        );
        let step = ToolExecStep::new(registry, fast_config());

        let mut state = RequestState::new("req-1");
        seed_calls(&mut state, &[("c1", ToolKind::Faq), ("c2", ToolKind::Document)]);
        run_step(&step, &[], &mut state).await;

        let tools = state.subsystem(Subsystem::Tools);
        assert_eq!(tools.get("tool_success"), Some(&json!(true)));
        assert_eq!(tools.get("partial_failure"), Some(&json!(false)));
        assert_eq!(tools.get("failed_sources"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_a_failed_source() {
        let registry = Arc::new(ToolRegistry::new());
        let step = ToolExecStep::new(registry, fast_config());

        let mut state = RequestState::new("req-1");
        seed_calls(&mut state, &[("c1", ToolKind::Document)]);
        run_step(&step, &[], &mut state).await;

        let tools = state.subsystem(Subsystem::Tools);
        assert_eq!(tools.get("tool_success"), Some(&json!(false)));
        assert_eq!(tools.get("failed_sources"), Some(&json!(["document"])));
    }

    #[tokio::test]
    async fn test_pending_calls_consumed() {
        let registry = Arc::new(ToolRegistry::new().register(Arc::new(FakeSource {
            kind: ToolKind::KnowledgeBase,
            mode: SourceMode::Passages(vec![passage("kb-1")]),
        })));
        let step = ToolExecStep::new(registry, fast_config());

        let mut state = RequestState::new("req-1");
        seed_calls(&mut state, &[("c1", ToolKind::KnowledgeBase)]);
        run_step(&step, &[], &mut state).await;

        assert_eq!(
            state.subsystem(Subsystem::Llm).get("pending_tool_calls"),
            Some(&Value::Null)
        );
    }
}
