//! Tool execution interface

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Result of executing a tool command
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Visible result text
    pub message: String,
    /// Whether execution failed
    pub is_error: bool,
    /// Alternate text to feed back to the model instead of `message`
    pub llm_follow_up: Option<String>,
}

impl ToolOutcome {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
            llm_follow_up: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
            llm_follow_up: None,
        }
    }

    /// The text the model sees on the follow-up pass
    pub fn follow_up_text(&self) -> &str {
        match self.llm_follow_up {
            Some(ref text) => text,
            None if !self.message.is_empty() => &self.message,
            None => "Tool executed successfully but returned no output.",
        }
    }
}

/// Executes slash commands on behalf of the orchestrator
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a command; implementations should honor the cancellation token
    /// for long-running work.
    async fn execute(&self, command: &str, cancel: CancellationToken) -> ToolOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_up_prefers_llm_text() {
        let outcome = ToolOutcome {
            message: "42 results".into(),
            is_error: false,
            llm_follow_up: Some("summarized results".into()),
        };
        assert_eq!(outcome.follow_up_text(), "summarized results");
    }

    #[test]
    fn test_follow_up_falls_back_to_message() {
        let outcome = ToolOutcome::text("plain output");
        assert_eq!(outcome.follow_up_text(), "plain output");
    }

    #[test]
    fn test_follow_up_empty_message_placeholder() {
        let outcome = ToolOutcome::text("");
        assert_eq!(
            outcome.follow_up_text(),
            "Tool executed successfully but returned no output."
        );
    }
}
