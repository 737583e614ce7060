//! Background conversation title generation
//!
//! Fire-and-forget: a short prompt goes through the transport, the reply is
//! sanitized into a plausible title, and the result is delivered through a
//! callback. Failures are logged and never surfaced to the conversation.

use std::sync::Arc;

use futures::StreamExt;
use hearth_stream::{
    DecodeEvent, ModelReply, ModelRequest, ModelTransport, SamplingParams, WireMessage,
};
use tokio_util::sync::CancellationToken;

/// Preferred keys when extracting a title out of JSON the model returned
/// instead of plain text.
const TITLE_FALLBACK_KEYS: [&str; 6] = ["title", "response", "summary", "content", "text", "name"];

const MAX_TITLE_CHARS: usize = 60;

/// Spawn the title-generation task.
pub fn spawn_title_generation(
    transport: Arc<dyn ModelTransport>,
    model: Option<String>,
    first_user_message: String,
    on_title: Arc<dyn Fn(String) + Send + Sync>,
) {
    if first_user_message.trim().is_empty() {
        return;
    }

    tokio::spawn(async move {
        match generate_title(transport, model, &first_user_message).await {
            Ok(Some(title)) => on_title(title),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("Non-blocking error during title generation: {}", e);
            }
        }
    });
}

async fn generate_title(
    transport: Arc<dyn ModelTransport>,
    model: Option<String>,
    first_user_message: &str,
) -> hearth_stream::Result<Option<String>> {
    let prompt = format!(
        "Generate a very short, concise title (4-5 words max) for the following user query: \"{first_user_message}\""
    );

    let request = ModelRequest {
        messages: vec![WireMessage::user(prompt)],
        system_instruction: Some("You generate short titles.".into()),
        sampling: SamplingParams {
            temperature: 0.2,
            ..SamplingParams::default()
        },
        model,
    };

    let raw = match transport.send(request, CancellationToken::new()).await? {
        ModelReply::Text(text) => text,
        ModelReply::Stream(mut stream) => {
            let mut accumulated = String::new();
            while let Some(event) = stream.next().await {
                match event? {
                    DecodeEvent::Delta(delta) => {
                        if let Some(content) = delta.content {
                            accumulated.push_str(&content);
                        }
                    }
                    DecodeEvent::Done => break,
                }
            }
            accumulated
        }
    };

    let title = sanitize_title(&raw);
    Ok(if title.is_empty() { None } else { Some(title) })
}

/// Normalize whatever the model produced into a short plain-text title.
///
/// Handles code fences, JSON payloads, leading labels ("Title: ..."),
/// surrounding quotes, and over-long output.
pub fn sanitize_title(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    if text.is_empty() {
        return String::new();
    }

    text = strip_code_fence(&text);
    if text.is_empty() {
        return String::new();
    }

    if text.starts_with('{') || text.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
            if let Some(extracted) = find_first_string(&parsed) {
                text = extracted;
            }
        }
    }

    let first_line = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or(&text);
    let mut normalized = first_line.trim().to_string();

    // Short leading labels like "Title:" get dropped; a colon deep into the
    // line is part of the title itself.
    if let Some(colon) = normalized.find(':') {
        if colon < 25 {
            normalized = normalized[colon + 1..].trim().to_string();
        }
    }

    normalized = normalized
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string();

    if normalized.chars().count() > MAX_TITLE_CHARS {
        normalized = normalized.chars().take(MAX_TITLE_CHARS).collect();
        normalized = normalized.trim().to_string();
    }
    normalized
}

fn strip_code_fence(text: &str) -> String {
    let mut out = text.trim();
    for prefix in ["```json", "```JSON", "```"] {
        if let Some(rest) = out.strip_prefix(prefix) {
            out = rest;
            break;
        }
    }
    out = out.strip_suffix("```").unwrap_or(out);
    out.trim().to_string()
}

fn find_first_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_first_string),
        serde_json::Value::Object(map) => {
            for key in TITLE_FALLBACK_KEYS {
                if let Some(found) = map.get(key).and_then(find_first_string) {
                    return Some(found);
                }
            }
            map.values().find_map(find_first_string)
        }
        _ => None,
    }
}
