//! Instruct-format prompt construction.
//!
//! The delimiter format here matches Mistral-style instruct models: user
//! turns wrapped in `[INST] ... [/INST]`, assistant turns as completions
//! terminated by `</s>`. The dispatcher hands over plain role/content
//! pairs; the rendering is this component's concern alone.

use crate::conversation::{ConversationTurn, Role};

/// Render conversation history as a prompt prefix.
pub fn format_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut formatted = String::from("<s>");
    for turn in history {
        match turn.role {
            Role::User => {
                formatted.push_str("[INST] ");
                formatted.push_str(&turn.content);
                formatted.push_str(" [/INST]");
            }
            Role::Assistant => {
                formatted.push_str(&turn.content);
                formatted.push_str("</s>");
            }
        }
    }
    formatted
}

/// Build the conversational chat prompt.
///
/// Relevant facts, when present, are framed as remembered information the
/// model may draw on.
pub fn chat_prompt(history: &[ConversationTurn], facts: &[String], query: &str) -> String {
    let history_str = format_history(history);
    let facts_str = if facts.is_empty() {
        String::new()
    } else {
        format!(
            "You have the following relevant information from your memory to help you answer:\n- {}\n",
            facts.join("\n- ")
        )
    };
    format!(
        "{history_str}[INST] {facts_str}Based on the conversation history and the provided \
         information, answer the following user query. Be concise and direct. \
         User query: {query} [/INST]"
    )
}

/// Wrap a structured-task system prompt (intent routing, summaries) in the
/// instruct format, after any history.
pub fn structured_prompt(history: &[ConversationTurn], system_prompt: &str) -> String {
    format!("{}[INST] {system_prompt} [/INST]", format_history(history))
}

/// Build the prompt that turns raw skill output into a natural answer.
pub fn summarize_output_prompt(original_command: &str, output: &str) -> String {
    format!(
        "You are an AI assistant. Your job is to interpret raw command output and explain it \
         to a non-technical user in a clear, concise, and friendly way.\n\n\
         The user originally asked: \"{original_command}\"\n\
         The following output was generated to answer their question:\n\
         --- OUTPUT ---\n{output}\n--- END OUTPUT ---\n\n\
         Now, summarize this output and answer the user's original question naturally. \
         Do not mention that you ran a command."
    )
}

/// Build the prompt that summarizes the conversation so far.
pub fn summarize_conversation_prompt(history: &[ConversationTurn]) -> String {
    let mut transcript = String::new();
    for turn in history {
        let who = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        transcript.push_str(who);
        transcript.push_str(": ");
        transcript.push_str(&turn.content);
        transcript.push('\n');
    }
    format!(
        "Summarize the following conversation in two or three sentences, \
         focusing on what was asked and decided:\n\n{transcript}"
    )
}
