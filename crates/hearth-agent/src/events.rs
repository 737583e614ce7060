//! Agent event types

use serde::{Deserialize, Serialize};

use crate::turn::ConversationTurn;

/// Events emitted during a send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A send started
    LoopStart,

    /// The streaming assistant turn was updated
    TurnUpdate { turn: ConversationTurn },

    /// An assistant turn completed
    TurnEnd { turn: ConversationTurn },

    /// Retrieval finished for this send
    RetrievalEnd { count: usize },

    /// Tool execution started
    ToolStart { command: String },

    /// Tool execution completed
    ToolEnd {
        command: String,
        output: String,
        is_error: bool,
    },

    /// The send finished
    LoopEnd { passes: u32 },

    /// Error occurred
    Error { message: String },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::LoopEnd { .. } | AgentEvent::Error { .. })
    }
}
