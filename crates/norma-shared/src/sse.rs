//! SSE wire encoding for streamed delivery.
//!
//! Newline-delimited frames, one content chunk per frame, terminated by
//! a reserved DONE frame. The HTTP layer only has to set the headers
//! below and copy encoded frames to the socket.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content type the HTTP adapter must set on a streamed response.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Cache-control the HTTP adapter must set on a streamed response.
pub const CACHE_CONTROL: &str = "no-cache";

/// Reserved terminator payload.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SseFrame {
    /// One content chunk.
    Chunk(String),
    /// End of stream.
    Done,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkPayload {
    content: String,
}

impl SseFrame {
    /// Encode to the wire form: `data: <payload>\n\n`.
    pub fn encode(&self) -> String {
        match self {
            SseFrame::Chunk(text) => {
                let payload = ChunkPayload {
                    content: text.clone(),
                };
                // String/map serialization cannot fail.
                let json = serde_json::to_string(&payload).unwrap_or_default();
                format!("data: {json}\n\n")
            }
            SseFrame::Done => format!("data: {DONE_PAYLOAD}\n\n"),
        }
    }

    /// Decode one wire frame. Used by tests and the CLI preview client.
    pub fn decode(frame: &str) -> Result<SseFrame, SseDecodeError> {
        let data = frame
            .strip_suffix("\n\n")
            .unwrap_or(frame)
            .strip_prefix("data: ")
            .ok_or(SseDecodeError::MissingDataPrefix)?;

        if data == DONE_PAYLOAD {
            return Ok(SseFrame::Done);
        }
        let payload: ChunkPayload =
            serde_json::from_str(data).map_err(|e| SseDecodeError::BadPayload(e.to_string()))?;
        Ok(SseFrame::Chunk(payload.content))
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum SseDecodeError {
    #[error("frame has no data prefix")]
    MissingDataPrefix,
    #[error("bad chunk payload: {0}")]
    BadPayload(String),
}

/// Why a frame write did not happen. Disconnect and overflow are
/// reported distinctly; neither is escalated as an error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamWriteError {
    #[error("client disconnected")]
    Disconnected,
    #[error("stream buffer overflow")]
    BufferOverflow,
}

/// Split answer content into chunks of at most `chunk_chars` characters,
/// never splitting inside a UTF-8 code point.
pub fn chunk_content(content: &str, chunk_chars: usize) -> Vec<String> {
    if content.is_empty() || chunk_chars == 0 {
        return vec![];
    }
    let mut chunks = vec![];
    let mut current = String::new();
    let mut count = 0usize;
    for ch in content.chars() {
        current.push(ch);
        count += 1;
        if count >= chunk_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
