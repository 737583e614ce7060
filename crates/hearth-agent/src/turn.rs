//! Conversation state: turns and the history aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Record of a tool invocation attached to an assistant turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    /// The slash command that was executed
    pub command: String,
    /// What the tool returned
    pub output: String,
}

/// One visible turn in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Extracted reasoning, shown separately from content
    pub thinking: Option<String>,
    pub tool_info: Option<ToolInfo>,
    /// True while the turn is still being streamed
    pub is_thinking: bool,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// A completed user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            thinking: None,
            tool_info: None,
            is_thinking: false,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    /// An empty assistant turn that streaming updates fill in
    pub fn assistant_placeholder() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            thinking: None,
            tool_info: None,
            is_thinking: true,
            is_error: false,
            timestamp: Utc::now(),
        }
    }
}

/// The owned conversation aggregate.
///
/// Only the orchestrator writes to it during a send; everything else reads
/// snapshots through events or accessors.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    consecutive_tool_errors: u32,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turn_mut(&mut self, id: &str) -> Option<&mut ConversationTurn> {
        self.turns.iter_mut().find(|t| t.id == id)
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// First user turn, used for title generation
    pub fn first_user_content(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// Drop the turn with the given id and everything after it.
    ///
    /// Supports edit and regenerate: the caller truncates, then re-sends.
    /// Returns false if the id was not found.
    pub fn truncate_from(&mut self, id: &str) -> bool {
        match self.turns.iter().position(|t| t.id == id) {
            Some(index) => {
                self.turns.truncate(index);
                true
            }
            None => false,
        }
    }

    pub fn consecutive_tool_errors(&self) -> u32 {
        self.consecutive_tool_errors
    }

    pub fn record_tool_error(&mut self) {
        self.consecutive_tool_errors += 1;
    }

    pub fn reset_tool_errors(&mut self) {
        self.consecutive_tool_errors = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_from_drops_tail() {
        let mut history = ConversationHistory::new();
        let first = ConversationTurn::user("one");
        let second = ConversationTurn::user("two");
        let second_id = second.id.clone();
        history.push(first);
        history.push(second);
        history.push(ConversationTurn::assistant_placeholder());

        assert!(history.truncate_from(&second_id));
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].content, "one");
    }

    #[test]
    fn test_truncate_from_unknown_id() {
        let mut history = ConversationHistory::new();
        history.push(ConversationTurn::user("hello"));
        assert!(!history.truncate_from("missing"));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_tool_error_counter() {
        let mut history = ConversationHistory::new();
        history.record_tool_error();
        history.record_tool_error();
        assert_eq!(history.consecutive_tool_errors(), 2);
        history.reset_tool_errors();
        assert_eq!(history.consecutive_tool_errors(), 0);
    }

    #[test]
    fn test_first_user_content_skips_assistant() {
        let mut history = ConversationHistory::new();
        history.push(ConversationTurn::assistant_placeholder());
        history.push(ConversationTurn::user("the question"));
        assert_eq!(history.first_user_content(), Some("the question"));
    }
}
