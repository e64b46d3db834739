//! Streaming reply decoding.
//!
//! Replies arrive as server-sent events. Each event's `data` is a JSON-RPC
//! envelope whose `result` is one [`StreamChunk`]. Text-bearing message
//! chunks are concatenated in arrival order; status and artifact updates are
//! observed but never become reply text.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{MessengerError, MessengerResult};

/// One streamed result, dispatched on its `kind` tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StreamChunk {
    Message {
        #[serde(default)]
        parts: Vec<Part>,
    },
    StatusUpdate {
        status: TaskStatus,
        #[serde(default, rename = "final")]
        is_final: bool,
    },
    ArtifactUpdate {
        #[serde(default)]
        artifact: Value,
    },
    Task {
        id: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskStatus {
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<StreamChunk>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Decode one event payload. `Ok(None)` for envelopes without a result.
pub fn parse_event(data: &str) -> MessengerResult<Option<StreamChunk>> {
    let envelope: Envelope = serde_json::from_str(data)?;
    if let Some(err) = envelope.error {
        return Err(MessengerError::Remote {
            code: err.code,
            message: err.message,
        });
    }
    Ok(envelope.result)
}

/// Fold one chunk into the reply text. Returns `true` once the stream
/// signalled its final status.
pub fn fold_chunk(chunk: StreamChunk, reply: &mut String) -> bool {
    match chunk {
        StreamChunk::Message { parts } => {
            for part in parts {
                if let Part::Text { text } = part {
                    reply.push_str(&text);
                }
            }
            false
        }
        StreamChunk::StatusUpdate { status, is_final } => {
            debug!(state = %status.state, is_final, "opponent status update");
            is_final
        }
        StreamChunk::ArtifactUpdate { .. } => {
            debug!("opponent artifact update");
            false
        }
        StreamChunk::Task { id } => {
            debug!(task_id = %id, "opponent task created");
            false
        }
        StreamChunk::Unknown => false,
    }
}

/// Incremental `text/event-stream` splitter yielding each event's data.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes; returns the data of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        normalize_newlines(&mut self.buf);
        let mut events = Vec::new();
        while let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buf.drain(..end + 2).collect();
            if let Some(data) = event_data(&raw[..end]) {
                events.push(data);
            }
        }
        events
    }

    /// Data of a trailing event not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buf);
        event_data(&raw)
    }
}

/// Rewrite every `\r\n` as `\n`. A trailing `\r` waits for the next push.
fn normalize_newlines(buf: &mut Vec<u8>) {
    if !buf.windows(2).any(|w| w == b"\r\n") {
        return;
    }
    let mut out = Vec::with_capacity(buf.len());
    let mut bytes = buf.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b == b'\r' && bytes.peek() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    *buf = out;
}

fn event_data(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_events() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let events = decoder.push(b": 1}\n\ndata: second\n\n: comment\n\n");
        assert_eq!(events, vec!["{\"a\": 1}".to_string(), "second".to_string()]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_crlf_and_trailing_event() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"event: message\r\ndata: one\r\n\r\ndata: two");
        assert_eq!(events, vec!["one".to_string()]);
        assert_eq!(decoder.finish().as_deref(), Some("two"));
    }

    #[test]
    fn test_decoder_mixed_line_endings() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: one\n\r\ndata: two\r\n\ndata: three\r");
        assert_eq!(events, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(decoder.push(b"\n\r\n"), vec!["three".to_string()]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_only_message_text_is_accumulated() {
        let events = [
            r#"{"jsonrpc":"2.0","id":"1","result":{"kind":"task","id":"t-1","status":{"state":"submitted"}}}"#,
            r#"{"jsonrpc":"2.0","id":"1","result":{"kind":"message","role":"agent","parts":[{"kind":"text","text":"go to "}]}}"#,
            r#"{"jsonrpc":"2.0","id":"1","result":{"kind":"artifact-update","artifact":{"parts":[{"kind":"text","text":"ignored"}]}}}"#,
            r#"{"jsonrpc":"2.0","id":"1","result":{"kind":"message","parts":[{"kind":"data","data":{}},{"kind":"text","text":"desk 1"}]}}"#,
            r#"{"jsonrpc":"2.0","id":"1","result":{"kind":"status-update","status":{"state":"completed"},"final":true}}"#,
        ];
        let mut reply = String::new();
        let mut finals = Vec::new();
        for data in events {
            let chunk = parse_event(data).unwrap().unwrap();
            finals.push(fold_chunk(chunk, &mut reply));
        }
        assert_eq!(reply, "go to desk 1");
        assert_eq!(finals, vec![false, false, false, false, true]);
    }

    #[test]
    fn test_unknown_kind_is_tolerated() {
        let chunk = parse_event(r#"{"result":{"kind":"heartbeat"}}"#).unwrap().unwrap();
        assert_eq!(chunk, StreamChunk::Unknown);
    }

    #[test]
    fn test_rpc_error_is_surfaced() {
        let err = parse_event(r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32600,"message":"bad request"}}"#)
            .unwrap_err();
        assert!(matches!(err, MessengerError::Remote { code: -32600, .. }));
    }
}
