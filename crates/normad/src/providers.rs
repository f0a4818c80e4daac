//! Collaborator traits.
//!
//! Everything the engine talks to over I/O sits behind one of these
//! traits so orchestration can be tested deterministically with fakes,
//! no network or database required. Production implementations live
//! with the API adapter; the in-process cache client and the channel
//! stream sink are provided here because the engine owns them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use norma_shared::error::InfraError;
use norma_shared::feedback::FeedbackRecord;
use norma_shared::golden::{GoldenAnswer, RegulatoryDelta};
use norma_shared::llm::{LlmReply, ToolKind};
use norma_shared::messages::ChatMessage;
use norma_shared::sse::{SseFrame, StreamWriteError};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Embedding generation. `None` means the backend declined this text;
/// infrastructure trouble is an `Err`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, InfraError>;
}

/// One LLM provider/model pair.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmReply, InfraError>;
}

/// Response cache. Purely an optimization; callers treat every failure
/// as a miss.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError>;
    async fn set(&self, key: &str, value: String) -> Result<(), InfraError>;
}

/// Curated store of vetted answers.
#[async_trait]
pub trait GoldenStore: Send + Sync {
    async fn vetted_answers(&self) -> Result<Vec<GoldenAnswer>, InfraError>;
}

/// Regulatory-change lookup for the low-confidence golden path.
#[async_trait]
pub trait KbDeltaSource: Send + Sync {
    async fn changes_since(
        &self,
        since: DateTime<Utc>,
        topic: &str,
    ) -> Result<Vec<RegulatoryDelta>, InfraError>;
}

/// One passage returned by a tool source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub source_id: String,
    pub content: String,
    pub score: f64,
}

/// Document search backing one `ToolKind`.
#[async_trait]
pub trait ToolSource: Send + Sync {
    fn kind(&self) -> ToolKind;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ToolResult>, InfraError>;
}

/// Persistence for accepted feedback.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn create(&self, record: FeedbackRecord) -> Result<(), InfraError>;
}

/// Frame writer for streamed delivery. Disconnect and overflow are
/// distinct signals, neither escalated as an error by the caller.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn open(&self) -> Result<(), InfraError>;
    async fn write(&self, frame: SseFrame) -> Result<(), StreamWriteError>;
    async fn close(&self);
}

// ============================================================================
// In-process implementations
// ============================================================================

/// LRU-backed cache client for single-host deployments.
pub struct LruCacheClient {
    inner: Mutex<LruCache<String, String>>,
}

impl LruCacheClient {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl CacheClient for LruCacheClient {
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let mut cache = self
            .inner
            .lock()
            .map_err(|_| InfraError::Unavailable("cache lock poisoned".into()))?;
        Ok(cache.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), InfraError> {
        let mut cache = self
            .inner
            .lock()
            .map_err(|_| InfraError::Unavailable("cache lock poisoned".into()))?;
        cache.put(key.to_string(), value);
        Ok(())
    }
}

/// Bounded-channel sink; the HTTP adapter drains the receiver into the
/// response body. A dropped receiver reads as client disconnect, a full
/// buffer as overflow.
pub struct ChannelSink {
    tx: mpsc::Sender<SseFrame>,
}

impl ChannelSink {
    pub fn new(buffer_capacity: usize) -> (Self, ReceiverStream<SseFrame>) {
        let (tx, rx) = mpsc::channel(buffer_capacity.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }
}

#[async_trait]
impl StreamSink for ChannelSink {
    async fn open(&self) -> Result<(), InfraError> {
        if self.tx.is_closed() {
            return Err(InfraError::Unavailable("stream channel closed".into()));
        }
        Ok(())
    }

    async fn write(&self, frame: SseFrame) -> Result<(), StreamWriteError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(StreamWriteError::BufferOverflow),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(StreamWriteError::Disconnected),
        }
    }

    async fn close(&self) {
        // Dropping the sender ends the stream; nothing to flush.
    }
}
