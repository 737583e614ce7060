//! hearth-agent: conversational agent orchestration
//!
//! This crate owns everything above the wire: conversation history, response
//! segmentation (reasoning / tool command / visible content), the vector
//! retrieval worker, system-prompt assembly, and the tool loop that drives a
//! user message through streaming, tool execution, and termination.

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod segmenter;
pub mod title;
pub mod tokens;
pub mod tool;
pub mod turn;

pub use error::{Error, Result};
pub use events::AgentEvent;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RetrievalConfig};
pub use retrieval::{
    EmbeddingProvider, KnowledgeFragment, KnowledgeStore, Retriever, cosine_similarity,
};
pub use segmenter::{CommandRoster, ParsedResponse, parse_response};
pub use title::sanitize_title;
pub use tokens::{clamp_to_token_budget, estimate_tokens};
pub use tool::{ToolExecutor, ToolOutcome};
pub use turn::{ConversationHistory, ConversationTurn, Role, ToolInfo};
