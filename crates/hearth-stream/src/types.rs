//! Core wire types for model streaming

use serde::{Deserialize, Serialize};

/// Role of a message on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    System,
    User,
    Assistant,
}

/// A flat request message as sent to the model server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: String,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: WireRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: WireRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: WireRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters for a generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub min_p: f32,
    pub repeat_penalty: f32,
    /// Maximum tokens to generate; `None` lets the server decide
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences
    pub stop: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            min_p: 0.08,
            repeat_penalty: 1.18,
            max_tokens: Some(512),
            stop: vec![
                "<|endoftext|>".to_string(),
                "</s>".to_string(),
                "<|return|>".to_string(),
            ],
        }
    }
}

impl SamplingParams {
    /// Derive a more conservative parameter set for retrying a degenerating
    /// generation: slightly hotter sampling and a stronger repeat penalty.
    pub fn safer(&self) -> Self {
        let mut next = self.clone();
        next.temperature = (self.temperature + 0.1).min(1.0);
        next.repeat_penalty = self.repeat_penalty + 0.05;
        next.max_tokens = Some(self.max_tokens.unwrap_or(512).min(512));
        next
    }
}

/// Generation timing info reported by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    #[serde(default)]
    pub prompt_n: u32,
    #[serde(default)]
    pub predicted_n: u32,
    #[serde(default)]
    pub predicted_ms: f64,
    #[serde(default)]
    pub cache_n: u32,
}

impl Timings {
    /// Decode speed in tokens per second; 0.0 when no timing data is present
    pub fn tokens_per_second(&self) -> f64 {
        if self.predicted_ms > 0.0 && self.predicted_n > 0 {
            (self.predicted_n as f64 / self.predicted_ms) * 1000.0
        } else {
            0.0
        }
    }
}

/// A partial tool call as it arrives on the stream.
///
/// Fragments for the same logical call share an index; their argument chunks
/// are concatenated in arrival order by [`crate::toolcall::merge_fragments`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Position within the current batch; `None` means append-at-end
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments_chunk: Option<String>,
}

/// A fully aggregated tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function_name: String,
    /// Raw argument text, concatenated from fragments; typically JSON
    pub arguments: String,
}

impl ToolCall {
    /// A call is usable once it has a function name
    pub fn is_complete(&self) -> bool {
        !self.function_name.is_empty()
    }
}

/// One decoded frame's worth of incremental response data.
///
/// Ephemeral: produced by the chunk decoder, consumed immediately by the
/// orchestrator, never retained past the current streaming pass.
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    /// Visible answer fragment
    pub content: Option<String>,
    /// Internal reasoning fragment
    pub reasoning: Option<String>,
    /// Tool-call fragments carried by this frame
    pub tool_calls: Vec<ToolCallFragment>,
    /// Timing info, when the server reports it
    pub timings: Option<Timings>,
    /// Model name, when the server reports it
    pub model: Option<String>,
}

impl StreamDelta {
    /// Whether this delta carries anything at all
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.reasoning.is_none()
            && self.tool_calls.is_empty()
            && self.timings.is_none()
            && self.model.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sampling_params() {
        let p = SamplingParams::default();
        assert!((p.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(p.max_tokens, Some(512));
        assert!(p.stop.contains(&"</s>".to_string()));
    }

    #[test]
    fn test_safer_params_clamp() {
        let p = SamplingParams {
            temperature: 0.95,
            ..Default::default()
        };
        let safer = p.safer();
        assert!((safer.temperature - 1.0).abs() < f32::EPSILON);
        assert!(safer.repeat_penalty > p.repeat_penalty);
    }

    #[test]
    fn test_tokens_per_second() {
        let t = Timings {
            predicted_n: 100,
            predicted_ms: 2000.0,
            ..Default::default()
        };
        assert!((t.tokens_per_second() - 50.0).abs() < 1e-9);
        assert_eq!(Timings::default().tokens_per_second(), 0.0);
    }

    #[test]
    fn test_empty_delta() {
        assert!(StreamDelta::default().is_empty());
        let d = StreamDelta {
            content: Some("hi".into()),
            ..Default::default()
        };
        assert!(!d.is_empty());
    }
}
