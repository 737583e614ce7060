//! System prompt and wire message assembly

use hearth_stream::WireMessage;

use crate::{
    segmenter::CommandRoster,
    turn::{ConversationTurn, Role},
};

/// Build the system instruction for the first model pass.
///
/// Embeds the command roster and, when retrieval produced anything, the
/// retrieved context block.
pub fn build_system_instruction(
    base_prompt: &str,
    roster: &CommandRoster,
    knowledge_context: Option<&str>,
) -> String {
    let commands_list = roster
        .commands()
        .iter()
        .map(|cmd| format!("/{cmd}"))
        .collect::<Vec<_>>()
        .join("\n");

    let knowledge_block = match knowledge_context.map(str::trim) {
        Some(context) if !context.is_empty() => {
            format!("\n\nCONTEXT:\n{context}\n")
        }
        _ => {
            "\n\nCONTEXT:\n(If needed, fetch details from saved knowledge with /read knowledge <title>)\n"
                .to_string()
        }
    };

    let persona = if base_prompt.trim().is_empty() {
        "Helpful assistant."
    } else {
        base_prompt.trim()
    };

    format!(
        "You are Hearth, an advanced local AI.\n\
         \n\
         CRITICAL PROTOCOL:\n\
         1. DECISION: When the user asks for an action (search, file edit, etc), you must use a tool.\n\
         2. INTERNAL CHECK: Before outputting, verify the command and its arguments are correct.\n\
         3. OUTPUT FORMAT:\n\
         \x20  - Output the command on its own line.\n\
         \x20  - DO NOT wrap it in markdown blocks.\n\
         \x20  - DO NOT add \"Here is the command\" or \"I will do that\".\n\
         \n\
         AVAILABLE COMMANDS:\n\
         {commands_list}{knowledge_block}\n\
         Persona: {persona}"
    )
}

/// Build the synthetic follow-up turn fed to the model after a tool runs.
///
/// The no-more-tools instruction is advisory; the orchestrator's loop bound
/// is what actually stops runaway tool use.
pub fn build_follow_up_instruction(tool_output: &str) -> String {
    format!(
        "TOOL OUTPUT:\n{tool_output}\n\n\
         INSTRUCTION: Using the information above, write the final response to the user. \
         Do NOT use any more tools."
    )
}

/// Convert visible turns into wire messages.
///
/// Tool output recorded on a turn is appended to its content so the model
/// sees what the tool said on earlier exchanges.
pub fn wire_messages(turns: &[ConversationTurn]) -> Vec<WireMessage> {
    turns
        .iter()
        .map(|turn| {
            let content = match turn.tool_info {
                Some(ref info) if !info.output.is_empty() => {
                    let separator = if turn.content.is_empty() { "" } else { "\n\n" };
                    format!("{}{}[Tool Output]\n{}", turn.content, separator, info.output)
                }
                _ => turn.content.clone(),
            };
            match turn.role {
                Role::User => WireMessage::user(content),
                Role::Assistant => WireMessage::assistant(content),
            }
        })
        .collect()
}
