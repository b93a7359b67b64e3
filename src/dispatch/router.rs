//! LLM-driven intent routing.
//!
//! The slow path asks the model to act as a JSON router: given the intent
//! catalog and the utterance, return a single object naming the function to
//! call and its parameters. Model output is messy in practice, so the
//! parser digs the first balanced JSON object out of whatever came back,
//! fences and all; anything unparseable falls back to chat.

use crate::skills::SkillParams;
use crate::state::AssistantState;
use serde_json::Value;

/// The synthetic conversational route always offered to the router.
pub const CHAT_FUNCTION: &str = "chat";

/// A parsed routing decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub function: String,
    pub parameters: SkillParams,
}

impl RoutingDecision {
    /// The fallback decision: chat about the raw utterance.
    pub fn chat(utterance: &str) -> Self {
        let mut parameters = SkillParams::new();
        parameters.insert(
            "user_query".to_owned(),
            Value::String(utterance.to_owned()),
        );
        Self {
            function: CHAT_FUNCTION.to_owned(),
            parameters,
        }
    }
}

/// Build the routing system prompt from the intent catalog.
pub fn routing_prompt(state: AssistantState, catalog: &Value, utterance: &str) -> String {
    format!(
        "You are the routing brain of a voice assistant. The assistant's current state is: {state}\n\
         \n\
         You must respond with a single, valid JSON object and nothing else.\n\
         The JSON object must have two keys:\n\
         1. \"function\": the name of the function to call.\n\
         2. \"parameters\": an object with the arguments for that function.\n\
         \n\
         Available functions:\n\
         {catalog}\n\
         - chat(user_query): general conversation, or when no other function fits.\n\
         \n\
         Analyze the user's request: \"{utterance}\"\n\
         Choose the most appropriate function and extract its parameters from the request."
    )
}

/// Parse the model's routing reply.
///
/// Returns the chat fallback when no JSON object can be extracted or the
/// object has no usable function name.
pub fn parse_decision(raw: &str, utterance: &str) -> RoutingDecision {
    let Some(object) = extract_json_object(raw) else {
        return RoutingDecision::chat(utterance);
    };

    let function = object
        .get("function")
        .or_else(|| object.get("skill"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    if function.is_empty() {
        return RoutingDecision::chat(utterance);
    }

    let parameters = object
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut decision = RoutingDecision {
        function,
        parameters,
    };
    if decision.function == CHAT_FUNCTION && !decision.parameters.contains_key("user_query") {
        decision
            .parameters
            .insert("user_query".to_owned(), Value::String(utterance.to_owned()));
    }
    decision
}

/// Extract the first balanced `{...}` block from `text`.
///
/// Tolerates markdown fences and surrounding prose; respects braces inside
/// JSON strings.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let candidate = &text[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_json_parses() {
        let decision = parse_decision(
            r#"{"function": "get_current_time", "parameters": {}}"#,
            "what time is it",
        );
        assert_eq!(decision.function, "get_current_time");
        assert!(decision.parameters.is_empty());
    }

    #[test]
    fn markdown_fences_are_tolerated() {
        let raw = "```json\n{\"function\": \"store_memory\", \"parameters\": {\"fact\": \"x\"}}\n```";
        let decision = parse_decision(raw, "remember x");
        assert_eq!(decision.function, "store_memory");
        assert_eq!(
            decision.parameters.get("fact").and_then(Value::as_str),
            Some("x")
        );
    }

    #[test]
    fn surrounding_prose_is_tolerated() {
        let raw = "Sure! Here is the routing decision: {\"function\": \"chat\", \
                   \"parameters\": {\"user_query\": \"hello\"}} Hope that helps.";
        let decision = parse_decision(raw, "hello");
        assert_eq!(decision.function, "chat");
    }

    #[test]
    fn garbage_falls_back_to_chat() {
        let decision = parse_decision("garbage no json here", "tell me a joke");
        assert_eq!(decision.function, "chat");
        assert_eq!(
            decision.parameters.get("user_query").and_then(Value::as_str),
            Some("tell me a joke")
        );
    }

    #[test]
    fn legacy_skill_key_is_accepted() {
        let decision = parse_decision(r#"{"skill": "recall_memory", "parameters": {}}"#, "x");
        assert_eq!(decision.function, "recall_memory");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let raw = r#"{"function": "chat", "parameters": {"user_query": "what does { mean"}}"#;
        let object = extract_json_object(raw).expect("parse");
        assert_eq!(object["parameters"]["user_query"], "what does { mean");
    }

    #[test]
    fn chat_decision_gets_the_utterance_injected() {
        let decision = parse_decision(r#"{"function": "chat", "parameters": {}}"#, "hi there");
        assert_eq!(
            decision.parameters.get("user_query").and_then(Value::as_str),
            Some("hi there")
        );
    }

    #[test]
    fn routing_prompt_names_state_and_functions() {
        let catalog = json!([{ "name": "get_current_time", "description": "time", "parameters": [] }]);
        let prompt = routing_prompt(AssistantState::Listening, &catalog, "what time is it");
        assert!(prompt.contains("LISTENING"));
        assert!(prompt.contains("get_current_time"));
        assert!(prompt.contains("chat(user_query)"));
        assert!(prompt.contains("what time is it"));
    }
}
