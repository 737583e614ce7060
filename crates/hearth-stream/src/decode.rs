//! Server-sent-event chunk decoding
//!
//! [`ChunkDecoder`] is a push-based state machine: feed it raw network chunks
//! in arrival order and it yields [`DecodeEvent`]s. A single logical JSON
//! object may be split across several `data:` frames; the decoder accumulates
//! payloads until they parse, bounded by a hard safety limit.

use serde::Deserialize;
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    types::{StreamDelta, Timings, ToolCallFragment},
};

/// Prefix of a data frame line
const FRAME_PREFIX: &str = "data: ";
/// Sentinel payload marking clean end of stream
const STREAM_SENTINEL: &str = "[DONE]";
/// Hard bound on the JSON accumulation buffer
const JSON_BUFFER_LIMIT: usize = 2 * 1024 * 1024;

/// Events produced by the decoder
#[derive(Debug, Clone)]
pub enum DecodeEvent {
    /// A decoded frame
    Delta(StreamDelta),
    /// The stream terminated cleanly (sentinel seen)
    Done,
}

/// Incremental SSE decoder tolerating partial lines and partial JSON.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    /// Unterminated tail of the last chunk
    line_buffer: String,
    /// Accumulated payload of a JSON object split across frames
    json_buffer: String,
    finished: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sentinel terminator has been seen. Callers use this to
    /// distinguish a clean end of stream from an interrupted transport.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Feed one raw network chunk, yielding zero or more events.
    ///
    /// After [`DecodeEvent::Done`] has been yielded, further input is ignored.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<DecodeEvent>> {
        let mut events = Vec::new();
        if self.finished {
            return Ok(events);
        }

        self.line_buffer.push_str(chunk);

        // Split on newline, keeping the last (possibly partial) line buffered.
        let mut lines: Vec<String> = self.line_buffer.split('\n').map(str::to_string).collect();
        self.line_buffer = lines.pop().unwrap_or_default();

        for line in lines {
            if self.finished {
                break;
            }
            let Some(payload) = line.strip_prefix(FRAME_PREFIX) else {
                continue;
            };

            if payload.trim() == STREAM_SENTINEL {
                self.finished = true;
                events.push(DecodeEvent::Done);
                continue;
            }

            self.json_buffer.push_str(payload);
            match serde_json::from_str::<RawChunk>(&self.json_buffer) {
                Ok(raw) => {
                    self.json_buffer.clear();
                    let delta = raw.into_delta();
                    if !delta.is_empty() {
                        events.push(DecodeEvent::Delta(delta));
                    }
                }
                Err(_) => {
                    // Incomplete JSON; keep buffering unless it grows past the bound.
                    if self.json_buffer.len() > JSON_BUFFER_LIMIT {
                        return Err(Error::BufferOverflow {
                            limit: JSON_BUFFER_LIMIT,
                        });
                    }
                }
            }
        }

        Ok(events)
    }
}

/// Lift a stream of raw byte chunks into a stream of decode events.
///
/// Cancellation is honored at chunk boundaries and surfaces as
/// [`Error::Aborted`], so downstream consumers can tell an abort apart from
/// a clean end. A stream that runs out of chunks without the sentinel ends
/// with no `Done` event; callers treat that as an interrupted generation.
pub fn decode_stream<S>(
    mut chunks: S,
    cancel: CancellationToken,
) -> Pin<Box<dyn Stream<Item = Result<DecodeEvent>> + Send>>
where
    S: Stream<Item = Result<bytes::Bytes>> + Send + Unpin + 'static,
{
    use futures::StreamExt;

    Box::pin(async_stream::stream! {
        let mut decoder = ChunkDecoder::new();
        let mut carry: Vec<u8> = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Aborted),
                chunk = chunks.next() => Ok(chunk),
            };
            let chunk = match next {
                Err(e) => {
                    yield Err(e);
                    return;
                }
                Ok(None) => break,
                Ok(Some(chunk)) => {
                    // Token may have fired while the chunk was in flight.
                    if cancel.is_cancelled() {
                        yield Err(Error::Aborted);
                        return;
                    }
                    chunk
                }
            };
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let text = take_valid_utf8(&mut carry, &bytes);
            match decoder.push(&text) {
                Ok(events) => {
                    for event in events {
                        let done = matches!(event, DecodeEvent::Done);
                        yield Ok(event);
                        if done {
                            return;
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

/// Append raw bytes and take the longest decodable UTF-8 prefix.
///
/// A multi-byte character split across network chunks stays in `carry` until
/// its remaining bytes arrive; genuinely invalid bytes decode to U+FFFD
/// instead of stalling the stream.
fn take_valid_utf8(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let mut out = String::new();
    loop {
        match std::str::from_utf8(carry) {
            Ok(text) => {
                out.push_str(text);
                carry.clear();
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&carry[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push('\u{FFFD}');
                        carry.drain(..valid + bad);
                    }
                    None => {
                        // Incomplete trailing sequence; wait for more bytes.
                        carry.drain(..valid);
                        break;
                    }
                }
            }
        }
    }
    out
}

// Wire shape of an OpenAI-compatible streaming chunk.

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(default)]
    choices: Vec<RawChoice>,
    #[serde(default)]
    timings: Option<Timings>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    #[serde(default)]
    delta: RawDelta,
}

#[derive(Debug, Default, Deserialize)]
struct RawDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<RawToolCall>>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    index: Option<i64>,
    id: Option<String>,
    function: Option<RawFunction>,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: Option<String>,
    arguments: Option<String>,
}

impl RawChunk {
    fn into_delta(self) -> StreamDelta {
        let mut delta = StreamDelta {
            timings: self.timings,
            model: self.model,
            ..Default::default()
        };

        if let Some(choice) = self.choices.into_iter().next() {
            if delta.model.is_none() {
                delta.model = choice.delta.model.clone();
            }
            delta.content = choice.delta.content.filter(|s| !s.is_empty());
            delta.reasoning = choice.delta.reasoning_content.filter(|s| !s.is_empty());
            if let Some(raw_calls) = choice.delta.tool_calls {
                delta.tool_calls = raw_calls
                    .into_iter()
                    .map(|tc| ToolCallFragment {
                        index: tc.index.and_then(|i| usize::try_from(i).ok()),
                        id: tc.id,
                        function_name: tc.function.as_ref().and_then(|f| f.name.clone()),
                        arguments_chunk: tc.function.and_then(|f| f.arguments),
                    })
                    .collect();
            }
        }

        delta
    }
}
