//! LLM invocation wire types.

use serde::{Deserialize, Serialize};

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Document source a tool call is dispatched to. Closed set; adding a
/// source means adding a variant and the match arms that go with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    KnowledgeBase,
    LaborAgreement,
    Document,
    Faq,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::KnowledgeBase => "knowledge_base",
            ToolKind::LaborAgreement => "labor_agreement",
            ToolKind::Document => "document",
            ToolKind::Faq => "faq",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub kind: ToolKind,
    pub query: String,
}

/// Successful provider reply: either final content or a tool-use request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmReply {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl LlmReply {
    pub fn content(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: Some(text.into()),
            tool_calls: vec![],
            usage,
        }
    }

    pub fn tool_use(calls: Vec<ToolCall>, usage: TokenUsage) -> Self {
        Self {
            content: None,
            tool_calls: calls,
            usage,
        }
    }

    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Classified invocation failure, kept in state for the retry check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmFailure {
    pub status_code: Option<u16>,
    pub message: String,
    pub retryable: bool,
}
