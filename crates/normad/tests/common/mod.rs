//! Deterministic fake collaborators for pipeline tests.
//!
//! No network, no database: every external surface is a scripted fake
//! so routing decisions can be asserted exactly.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use norma_shared::config::Config;
use norma_shared::error::InfraError;
use norma_shared::golden::{GoldenAnswer, RegulatoryDelta};
use norma_shared::llm::{LlmReply, ToolKind};
use norma_shared::messages::ChatMessage;
use norma_shared::sse::{SseFrame, StreamWriteError};
use normad::providers::{
    CacheClient, EmbeddingProvider, FeedbackStore, GoldenStore, KbDeltaSource, LlmProvider,
    LruCacheClient, StreamSink, ToolResult, ToolSource,
};
use normad::{Collaborators, Pipeline};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct FixedEmbedder {
    pub vector: Option<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>, InfraError> {
        Ok(self.vector.clone())
    }
}

pub struct FixedGoldenStore {
    pub answers: Vec<GoldenAnswer>,
}

#[async_trait]
impl GoldenStore for FixedGoldenStore {
    async fn vetted_answers(&self) -> Result<Vec<GoldenAnswer>, InfraError> {
        Ok(self.answers.clone())
    }
}

pub struct QuietKb;

#[async_trait]
impl KbDeltaSource for QuietKb {
    async fn changes_since(
        &self,
        _since: DateTime<Utc>,
        _topic: &str,
    ) -> Result<Vec<RegulatoryDelta>, InfraError> {
        Ok(vec![])
    }
}

/// Scripted provider: returns replies in order, repeating the last one,
/// and counts invocations.
pub struct ScriptedLlm {
    pub name: &'static str,
    pub replies: Vec<Result<LlmReply, InfraError>>,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<LlmReply, InfraError>>) -> Arc<Self> {
        Arc::new(Self {
            name: "primary",
            replies,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "test-model"
    }

    async fn chat(&self, _messages: &[ChatMessage]) -> Result<LlmReply, InfraError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .get(call.min(self.replies.len().saturating_sub(1)))
            .cloned()
            .unwrap_or(Err(InfraError::Unavailable("script exhausted".into())))
    }
}

pub enum ToolScript {
    Passages(Vec<ToolResult>),
    Error,
}

pub struct ScriptedTool {
    pub tool_kind: ToolKind,
    pub script: ToolScript,
}

#[async_trait]
impl ToolSource for ScriptedTool {
    fn kind(&self) -> ToolKind {
        self.tool_kind
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<ToolResult>, InfraError> {
        match &self.script {
            ToolScript::Passages(p) => Ok(p.clone()),
            ToolScript::Error => Err(InfraError::Unavailable("index offline".into())),
        }
    }
}

pub struct NullFeedbackStore;

#[async_trait]
impl FeedbackStore for NullFeedbackStore {
    async fn create(
        &self,
        _record: norma_shared::feedback::FeedbackRecord,
    ) -> Result<(), InfraError> {
        Ok(())
    }
}

/// Sink that records frames and optionally disconnects after a fixed
/// number of accepted frames.
pub struct RecordingSink {
    pub accept: usize,
    pub frames: Mutex<Vec<SseFrame>>,
    pub closes: AtomicUsize,
}

impl RecordingSink {
    pub fn unbounded() -> Arc<Self> {
        Arc::new(Self {
            accept: usize::MAX,
            frames: Mutex::new(vec![]),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn disconnect_after(accept: usize) -> Arc<Self> {
        Arc::new(Self {
            accept,
            frames: Mutex::new(vec![]),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn frames(&self) -> Vec<SseFrame> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamSink for RecordingSink {
    async fn open(&self) -> Result<(), InfraError> {
        Ok(())
    }

    async fn write(&self, frame: SseFrame) -> Result<(), StreamWriteError> {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= self.accept {
            return Err(StreamWriteError::Disconnected);
        }
        frames.push(frame);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A vetted golden answer whose question embedding is the unit x-axis.
pub fn vetted_answer(faq_id: &str) -> GoldenAnswer {
    GoldenAnswer {
        faq_id: faq_id.to_string(),
        question: "what is the statutory notice period".into(),
        answer: "The statutory notice period is one month.".into(),
        citations: vec!["BW 7:672".into()],
        embedding: Some(vec![1.0, 0.0]),
        effective_at: Utc::now() - Duration::days(30),
    }
}

pub fn passage(source_id: &str, content: &str) -> ToolResult {
    ToolResult {
        source_id: source_id.to_string(),
        content: content.to_string(),
        score: 0.9,
    }
}

/// Assembles a pipeline from knobs; unset knobs get quiet defaults.
pub struct World {
    pub config: Config,
    pub query_embedding: Option<Vec<f32>>,
    pub golden_answers: Vec<GoldenAnswer>,
    pub llm: Arc<ScriptedLlm>,
    pub tools: Vec<Arc<ScriptedTool>>,
    pub sink: Arc<RecordingSink>,
    pub cache: Arc<LruCacheClient>,
}

impl World {
    pub fn new(llm: Arc<ScriptedLlm>) -> Self {
        Self {
            config: Config::default(),
            query_embedding: Some(vec![1.0, 0.0]),
            golden_answers: vec![],
            llm,
            tools: vec![],
            sink: RecordingSink::unbounded(),
            cache: Arc::new(LruCacheClient::new(64)),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        let mut registry = normad::engine::ToolRegistry::new();
        for tool in &self.tools {
            registry = registry.register(tool.clone() as Arc<dyn ToolSource>);
        }
        Pipeline::new(
            Arc::new(self.config.clone()),
            Collaborators {
                embedder: Arc::new(FixedEmbedder {
                    vector: self.query_embedding.clone(),
                }),
                golden_store: Arc::new(FixedGoldenStore {
                    answers: self.golden_answers.clone(),
                }),
                kb_delta: Arc::new(QuietKb),
                cache: self.cache.clone(),
                llm_providers: vec![self.llm.clone() as Arc<dyn LlmProvider>],
                tools: registry,
                feedback_store: Arc::new(NullFeedbackStore),
                sink: self.sink.clone(),
            },
        )
    }
}
