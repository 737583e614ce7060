//! The agent loop
//!
//! `Orchestrator::send` drives one user request through context assembly,
//! model streaming, tool detection and execution, and termination. Tool
//! passes communicate through an ephemeral shadow context that is fed to the
//! model but never committed to visible history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use hearth_stream::{
    BatchTracker, DecodeEvent, ModelReply, ModelRequest, ModelTransport, SamplingParams, ToolCall,
    WireMessage,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    events::AgentEvent,
    prompt,
    retrieval::{EmbeddingProvider, Retriever},
    segmenter::{self, CommandRoster, ParsedResponse},
    title, tokens,
    tool::ToolExecutor,
    turn::{ConversationHistory, ConversationTurn, ToolInfo},
};

/// Retrieval knobs for a send
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub similarity_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_threshold: 0.5,
        }
    }
}

/// Orchestrator configuration
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Maximum tool executions per send
    pub max_tool_loops: u32,
    /// Consecutive tool errors that trip the circuit breaker
    pub tool_error_breaker: u32,
    /// How many recent turns to offer the model
    pub context_window_turns: usize,
    /// Token budget for the offered turns
    pub max_context_tokens: usize,
    /// Retrieval settings; None disables retrieval
    pub retrieval: Option<RetrievalConfig>,
    /// Persona text embedded in the system instruction
    pub base_prompt: String,
    pub roster: CommandRoster,
    pub sampling: SamplingParams,
    pub model: Option<String>,
    /// Minimum interval between visible streaming updates
    pub update_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_loops: 5,
            tool_error_breaker: 2,
            context_window_turns: 20,
            max_context_tokens: 2048,
            retrieval: None,
            base_prompt: String::new(),
            roster: CommandRoster::default(),
            sampling: SamplingParams::default(),
            model: None,
            update_interval: Duration::from_millis(33),
        }
    }
}

/// What one model pass produced
struct PassOutput {
    parsed: ParsedResponse,
    thinking: Option<String>,
    native_calls: Vec<ToolCall>,
    aborted: bool,
    degenerate: bool,
}

/// Drives conversations through the transport and tool executor
pub struct Orchestrator {
    config: OrchestratorConfig,
    history: ConversationHistory,
    transport: Arc<dyn ModelTransport>,
    executor: Arc<dyn ToolExecutor>,
    retriever: Option<Retriever>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    event_tx: broadcast::Sender<AgentEvent>,
    cancel: Arc<Mutex<CancellationToken>>,
    on_title: Option<Arc<dyn Fn(String) + Send + Sync>>,
    title_generated: bool,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        transport: Arc<dyn ModelTransport>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            history: ConversationHistory::new(),
            transport,
            executor,
            retriever: None,
            embedder: None,
            event_tx,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            on_title: None,
            title_generated: false,
        }
    }

    /// Enable retrieval with a worker handle and an embedding provider.
    pub fn with_retrieval(mut self, retriever: Retriever, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.retriever = Some(retriever);
        self.embedder = Some(embedder);
        self
    }

    /// Register a callback invoked with the generated conversation title.
    pub fn set_title_callback(&mut self, on_title: impl Fn(String) + Send + Sync + 'static) {
        self.on_title = Some(Arc::new(on_title));
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Drop a turn and everything after it. The caller then re-sends the
    /// edited text to regenerate from that point.
    pub fn truncate_from(&mut self, turn_id: &str) -> bool {
        self.history.truncate_from(turn_id)
    }

    /// Abort the in-flight send
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Get the cancellation token holder for external abort wiring
    pub fn cancel_handle(&self) -> Arc<Mutex<CancellationToken>> {
        Arc::clone(&self.cancel)
    }

    /// Send a user message and run the loop to completion.
    ///
    /// Cancellation is a normal terminal state: partial content already
    /// applied to the assistant turn is kept and `Ok(())` is returned. Fatal
    /// errors leave exactly one generic error turn and return the error.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        self.history.push(ConversationTurn::user(text));
        let _ = self.event_tx.send(AgentEvent::LoopStart);

        let knowledge_context = self.retrieve_context(text).await;

        let mut shadow: Vec<WireMessage> = Vec::new();
        let mut executed_tools = 0u32;
        let mut sampling = self.config.sampling.clone();
        let mut degenerate_retried = false;
        let mut active_id = self.push_placeholder(None);

        let result: Result<()> = loop {
            let system = prompt::build_system_instruction(
                &self.config.base_prompt,
                &self.config.roster,
                knowledge_context.as_deref(),
            );
            let mut messages = prompt::wire_messages(&self.context_turns(&active_id));
            messages.extend(shadow.iter().cloned());

            let request = ModelRequest {
                messages,
                system_instruction: Some(system),
                sampling: sampling.clone(),
                model: self.config.model.clone(),
            };

            let reply = match self.transport.send(request, cancel.clone()).await {
                Ok(reply) => reply,
                Err(hearth_stream::Error::Aborted) => {
                    self.finalize_turn(&active_id, None, None);
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            };

            let pass = match self.consume_reply(reply, &active_id).await {
                Ok(pass) => pass,
                Err(hearth_stream::Error::Aborted) => {
                    self.finalize_turn(&active_id, None, None);
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            };

            if pass.degenerate && !degenerate_retried {
                degenerate_retried = true;
                sampling = sampling.safer();
                tracing::warn!("Degenerate output detected; retrying once with safer sampling");
                continue;
            }

            if pass.aborted {
                self.finalize_turn(&active_id, Some(&pass.parsed), pass.thinking.as_deref());
                break Ok(());
            }

            // Native tool-call channel wins; the line-scan fallback only
            // applies when the provider produced no structured calls.
            let command = match pass.native_calls.first() {
                Some(call) => Some(command_for(call)),
                None => pass.parsed.tool_command.clone(),
            };

            let Some(command) = command else {
                self.finalize_turn(&active_id, Some(&pass.parsed), pass.thinking.as_deref());
                self.history.reset_tool_errors();
                self.maybe_spawn_title();
                break Ok(());
            };

            if self.history.consecutive_tool_errors() >= self.config.tool_error_breaker {
                self.fail_turn(&active_id, "Tool execution failed repeatedly. Stopping generation.");
                break Ok(());
            }

            if executed_tools >= self.config.max_tool_loops {
                self.fail_turn(&active_id, "Stopping to avoid tool loop.");
                break Ok(());
            }
            executed_tools += 1;

            let _ = self.event_tx.send(AgentEvent::ToolStart {
                command: command.clone(),
            });
            let outcome = self.executor.execute(&command, cancel.clone()).await;
            let _ = self.event_tx.send(AgentEvent::ToolEnd {
                command: command.clone(),
                output: outcome.message.clone(),
                is_error: outcome.is_error,
            });
            if outcome.is_error {
                self.history.record_tool_error();
            }

            self.finalize_turn(&active_id, Some(&pass.parsed), pass.thinking.as_deref());

            shadow.push(WireMessage::assistant(pass.parsed.raw.clone()));
            shadow.push(WireMessage::user(prompt::build_follow_up_instruction(
                outcome.follow_up_text(),
            )));

            active_id = self.push_placeholder(Some(ToolInfo {
                command,
                output: outcome.message,
            }));
        };

        if let Err(ref e) = result {
            tracing::error!("Send failed: {}", e);
            let _ = self.event_tx.send(AgentEvent::Error {
                message: e.to_string(),
            });
            self.fail_turn(&active_id, "Sorry, an error occurred while generating the response.");
        }

        let _ = self.event_tx.send(AgentEvent::LoopEnd {
            passes: executed_tools,
        });
        result
    }

    /// Embed the query and search the knowledge store. Any failure disables
    /// retrieval for this request only.
    async fn retrieve_context(&self, query: &str) -> Option<String> {
        let retriever = self.retriever.as_ref()?;
        let embedder = self.embedder.as_ref()?;
        let config = self.config.retrieval.as_ref()?;

        let embedding = match embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!("Embedding failed, retrieval disabled for this request: {}", e);
                return None;
            }
        };

        match retriever
            .search(embedding, config.top_k, config.similarity_threshold)
            .await
        {
            Ok(fragments) => {
                let _ = self.event_tx.send(AgentEvent::RetrievalEnd {
                    count: fragments.len(),
                });
                if fragments.is_empty() {
                    None
                } else {
                    Some(
                        fragments
                            .iter()
                            .map(|f| f.content.as_str())
                            .collect::<Vec<_>>()
                            .join("\n\n"),
                    )
                }
            }
            Err(e) => {
                tracing::warn!("Retrieval search failed: {}", e);
                None
            }
        }
    }

    /// Visible turns offered to the model: everything except the streaming
    /// placeholder, windowed by turn count, then clamped to the token budget.
    fn context_turns(&self, active_id: &str) -> Vec<ConversationTurn> {
        let visible: Vec<ConversationTurn> = self
            .history
            .turns()
            .iter()
            .filter(|t| t.id != active_id)
            .cloned()
            .collect();
        let start = visible.len().saturating_sub(self.config.context_window_turns);
        tokens::clamp_to_token_budget(&visible[start..], self.config.max_context_tokens)
    }

    fn push_placeholder(&mut self, tool_info: Option<ToolInfo>) -> String {
        let mut placeholder = ConversationTurn::assistant_placeholder();
        placeholder.tool_info = tool_info;
        let id = placeholder.id.clone();
        self.history.push(placeholder);
        id
    }

    /// Consume a transport reply, applying deltas to the placeholder in
    /// arrival order with debounced visible updates and one final
    /// unconditional update.
    async fn consume_reply(
        &mut self,
        reply: ModelReply,
        active_id: &str,
    ) -> hearth_stream::Result<PassOutput> {
        match reply {
            ModelReply::Text(text) => {
                let parsed = segmenter::parse_response(&text, &self.config.roster);
                let thinking = parsed.thinking.clone();
                self.apply_stream_update(active_id, &parsed, thinking.as_deref());
                Ok(PassOutput {
                    parsed,
                    thinking,
                    native_calls: Vec::new(),
                    aborted: false,
                    degenerate: false,
                })
            }
            ModelReply::Stream(mut stream) => {
                let mut raw = String::new();
                let mut native_thinking = String::new();
                let mut tracker = BatchTracker::new();
                let mut aborted = false;
                let mut degenerate = false;
                let mut saw_done = false;
                // Backdate so the first delta renders immediately.
                let mut last_update = Instant::now()
                    .checked_sub(self.config.update_interval)
                    .unwrap_or_else(Instant::now);

                while let Some(event) = stream.next().await {
                    match event {
                        Ok(DecodeEvent::Delta(delta)) => {
                            if let Some(ref content) = delta.content {
                                raw.push_str(content);
                                if hearth_stream::looks_degenerate(&raw) {
                                    degenerate = true;
                                    break;
                                }
                            }
                            if let Some(ref reasoning) = delta.reasoning {
                                native_thinking.push_str(reasoning);
                            }
                            tracker.apply(&delta);

                            if last_update.elapsed() >= self.config.update_interval {
                                last_update = Instant::now();
                                let parsed = segmenter::parse_response(&raw, &self.config.roster);
                                self.apply_stream_update(
                                    active_id,
                                    &parsed,
                                    non_empty(&native_thinking),
                                );
                            }
                        }
                        Ok(DecodeEvent::Done) => {
                            saw_done = true;
                            break;
                        }
                        Err(hearth_stream::Error::Aborted) => {
                            aborted = true;
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }

                // A stream that ran out without the sentinel was interrupted,
                // not completed; its partial text must not drive tools.
                if !saw_done && !degenerate {
                    aborted = true;
                }

                let parsed = segmenter::parse_response(&raw, &self.config.roster);
                let thinking = non_empty(&native_thinking)
                    .map(str::to_string)
                    .or_else(|| parsed.thinking.clone());
                self.apply_stream_update(active_id, &parsed, thinking.as_deref());

                Ok(PassOutput {
                    parsed,
                    thinking,
                    native_calls: tracker.into_calls(),
                    aborted,
                    degenerate,
                })
            }
        }
    }

    fn apply_stream_update(&mut self, id: &str, parsed: &ParsedResponse, thinking: Option<&str>) {
        if let Some(turn) = self.history.turn_mut(id) {
            turn.content = parsed.content.clone();
            turn.thinking = thinking
                .map(str::to_string)
                .or_else(|| parsed.thinking.clone());
            let snapshot = turn.clone();
            let _ = self.event_tx.send(AgentEvent::TurnUpdate { turn: snapshot });
        }
    }

    fn finalize_turn(&mut self, id: &str, parsed: Option<&ParsedResponse>, thinking: Option<&str>) {
        if let Some(turn) = self.history.turn_mut(id) {
            if let Some(parsed) = parsed {
                turn.content = parsed.content.clone();
                turn.thinking = thinking
                    .map(str::to_string)
                    .or_else(|| parsed.thinking.clone());
            }
            turn.is_thinking = false;
            let snapshot = turn.clone();
            let _ = self.event_tx.send(AgentEvent::TurnEnd { turn: snapshot });
        }
    }

    fn fail_turn(&mut self, id: &str, message: &str) {
        if let Some(turn) = self.history.turn_mut(id) {
            turn.content = message.to_string();
            turn.is_error = true;
            turn.is_thinking = false;
            let snapshot = turn.clone();
            let _ = self.event_tx.send(AgentEvent::TurnEnd { turn: snapshot });
        }
        let _ = self.event_tx.send(AgentEvent::Error {
            message: message.to_string(),
        });
    }

    fn maybe_spawn_title(&mut self) {
        if self.title_generated {
            return;
        }
        let Some(ref on_title) = self.on_title else {
            return;
        };
        let Some(first) = self.history.first_user_content() else {
            return;
        };
        self.title_generated = true;
        title::spawn_title_generation(
            Arc::clone(&self.transport),
            self.config.model.clone(),
            first.to_string(),
            Arc::clone(on_title),
        );
    }
}

/// Render a structured tool call as a slash command for the executor.
fn command_for(call: &ToolCall) -> String {
    let args = call.arguments.trim();
    if args.is_empty() {
        format!("/{}", call.function_name)
    } else {
        format!("/{} {}", call.function_name, args)
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
