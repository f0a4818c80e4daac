//! Streamed delivery.
//!
//! Turns the completed answer into SSE frames. Setup failure falls back
//! to single-pass delivery instead of leaving the client hanging; a
//! mid-stream disconnect stops writes and triggers cleanup without
//! becoming an error; buffer overflow is reported distinctly. The
//! single-pass guard keeps the response from being emitted twice even
//! if the step is driven repeatedly.

use crate::providers::StreamSink;
use crate::step::Step;
use async_trait::async_trait;
use norma_shared::config::Config;
use norma_shared::messages::ChatMessage;
use norma_shared::patch::StepPatch;
use norma_shared::sse::{chunk_content, SseFrame, StreamWriteError};
use norma_shared::state::{ProcessingStage, RequestState, Subsystem};
use serde_json::{json, Map};
use std::sync::Arc;
use tracing::{info, warn};

pub struct StreamDeliveryStep {
    sink: Arc<dyn StreamSink>,
    config: Arc<Config>,
}

impl StreamDeliveryStep {
    pub fn new(sink: Arc<dyn StreamSink>, config: Arc<Config>) -> Self {
        Self { sink, config }
    }

    fn single_pass(reason: &str) -> StepPatch {
        info!("[S]  single-pass delivery ({})", reason);
        let mut extra = Map::new();
        extra.insert("mode".into(), json!("single_pass"));
        extra.insert("response_complete".into(), json!(true));
        StepPatch::new()
            .extra(Subsystem::Streaming, extra)
            .decision("response_complete", true)
            .stage(ProcessingStage::Feedback)
            .complete(true)
    }
}

#[async_trait]
impl Step for StreamDeliveryStep {
    fn name(&self) -> &'static str {
        "stream_delivery"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Streaming
    }

    async fn run(&self, _messages: &[ChatMessage], ctx: &RequestState) -> StepPatch {
        let Some(answer) = &ctx.answer else {
            // nothing to deliver; the pipeline always sets an answer
            // (possibly a degraded one) before this step
            let mut extra = Map::new();
            extra.insert("skipped".into(), json!("no_answer"));
            return StepPatch::new()
                .extra(Subsystem::Streaming, extra)
                .decision("response_complete", false)
                .complete(true);
        };

        // CHECK: streaming must be enabled globally and requested for
        // this response
        let requested = ctx
            .subsystem(Subsystem::Streaming)
            .get("requested")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if !self.config.streaming.enabled || !requested {
            return Self::single_pass("streaming disabled");
        }

        // SETUP
        if let Err(e) = self.sink.open().await {
            warn!("[S]  stream setup failed: {}", e);
            let mut extra = Map::new();
            extra.insert("fallback_to_single_pass".into(), json!(true));
            extra.insert("setup_error".into(), json!(e.to_string()));
            return Self::single_pass("setup failed")
                .extra(Subsystem::Streaming, extra)
                .decision("streaming_setup_ok", false);
        }

        // GENERATE
        let chunks = chunk_content(&answer.content, self.config.streaming.chunk_chars);
        let chunks_attempted = chunks.len();

        // SINGLE_PASS_GUARD: emit the full response exactly once
        if ctx.flat_flag("streaming_delivered") {
            info!("[S]  response already delivered, guard skipping re-emit");
            let mut extra = Map::new();
            extra.insert("guard_skipped".into(), json!(true));
            return StepPatch::new()
                .extra(Subsystem::Streaming, extra)
                .decision("response_complete", true)
                .stage(ProcessingStage::Feedback)
                .complete(true);
        }

        // WRITE
        let mut chunks_written = 0usize;
        let mut disconnect = false;
        let mut buffer_overflow = false;
        for chunk in chunks {
            match self.sink.write(SseFrame::Chunk(chunk)).await {
                Ok(()) => chunks_written += 1,
                Err(StreamWriteError::Disconnected) => {
                    disconnect = true;
                    break;
                }
                Err(StreamWriteError::BufferOverflow) => {
                    buffer_overflow = true;
                    break;
                }
            }
        }
        if !disconnect && !buffer_overflow {
            match self.sink.write(SseFrame::Done).await {
                Ok(()) => {}
                Err(StreamWriteError::Disconnected) => disconnect = true,
                Err(StreamWriteError::BufferOverflow) => buffer_overflow = true,
            }
        }

        let delivered = !disconnect && !buffer_overflow;
        let cleanup_triggered = !delivered;
        if cleanup_triggered {
            // stop writing, release the channel; committed side effects
            // (cache writes, metrics) stay as they are
            self.sink.close().await;
        }

        if disconnect {
            info!(
                "[S]  client disconnected after {}/{} chunks",
                chunks_written, chunks_attempted
            );
        } else if buffer_overflow {
            warn!(
                "[S]  buffer overflow after {}/{} chunks",
                chunks_written, chunks_attempted
            );
        } else {
            info!("[S]  streamed {} chunk(s) + done frame", chunks_written);
        }

        let mut extra = Map::new();
        extra.insert("mode".into(), json!("sse"));
        extra.insert("chunks_attempted".into(), json!(chunks_attempted));
        extra.insert("chunks_written".into(), json!(chunks_written));
        extra.insert("delivered".into(), json!(delivered));
        extra.insert("disconnect".into(), json!(disconnect));
        extra.insert("buffer_overflow".into(), json!(buffer_overflow));
        extra.insert("cleanup_triggered".into(), json!(cleanup_triggered));
        extra.insert("response_complete".into(), json!(delivered));

        StepPatch::new()
            .extra(Subsystem::Streaming, extra)
            .decision("response_complete", delivered)
            .decision("stream_disconnect", disconnect)
            .stage(ProcessingStage::Feedback)
            .complete(true)
    }
}
