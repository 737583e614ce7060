//! hearth-stream: wire-level streaming layer
//!
//! This crate turns raw model-server byte streams into structured deltas and
//! provides the transport abstraction the agent layer drives: server-sent-event
//! chunk decoding (tolerant of JSON split across frames), incremental tool-call
//! aggregation, and an HTTP transport with retry support.

pub mod decode;
pub mod error;
pub mod guard;
pub mod toolcall;
pub mod transport;
pub mod types;

pub use decode::{ChunkDecoder, DecodeEvent, decode_stream};
pub use error::{Error, ErrorKind, Result};
pub use guard::looks_degenerate;
pub use toolcall::{BatchTracker, merge_fragments};
pub use transport::{DeltaStream, HttpTransport, ModelReply, ModelRequest, ModelTransport, RetryConfig};
pub use types::{SamplingParams, StreamDelta, Timings, ToolCall, ToolCallFragment, WireMessage, WireRole};
