//! Wire types for the command channel.
//!
//! Requests and replies are single JSON documents. The frontend sends the
//! user's utterance plus its current state; the backend replies with a
//! [`DispatchResponse`] telling the frontend what to do next.

use crate::state::AssistantState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel utterance that clears the conversation history instead of being
/// dispatched.
pub const CLEAR_CONVERSATION_SENTINEL: &str = "__AIST_CLEAR_CONVERSATION__";

/// What the frontend should do with a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Speak the reply (if any); state unchanged.
    Command,
    /// Transition DORMANT → LISTENING.
    Activate,
    /// Transition LISTENING → DORMANT.
    Deactivate,
    /// Shut down the assistant.
    Exit,
    /// Do nothing.
    Ignore,
}

/// A matched intent echoed back to the frontend for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRef {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl IntentRef {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Backend reply to a dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speak: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentRef>,
}

impl DispatchResponse {
    /// A spoken command reply.
    pub fn command(speak: impl Into<String>) -> Self {
        Self {
            action: Action::Command,
            speak: Some(speak.into()),
            intent: None,
        }
    }

    /// A spoken command reply attributed to an intent.
    pub fn command_with_intent(speak: impl Into<String>, intent: IntentRef) -> Self {
        Self {
            action: Action::Command,
            speak: Some(speak.into()),
            intent: Some(intent),
        }
    }

    /// Wake-up acknowledgment.
    pub fn activate() -> Self {
        Self {
            action: Action::Activate,
            speak: Some("Listening.".to_owned()),
            intent: None,
        }
    }

    /// Pause acknowledgment.
    pub fn deactivate() -> Self {
        Self {
            action: Action::Deactivate,
            speak: Some("Okay.".to_owned()),
            intent: None,
        }
    }

    /// Shutdown acknowledgment.
    pub fn exit() -> Self {
        Self {
            action: Action::Exit,
            speak: Some("Goodbye.".to_owned()),
            intent: None,
        }
    }

    /// Silent ignore.
    pub fn ignore() -> Self {
        Self {
            action: Action::Ignore,
            speak: None,
            intent: None,
        }
    }
}

/// Utterance payload of a command request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub text: String,
    pub state: AssistantState,
}

/// A request on the command channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CommandRequest {
    /// Dispatch an utterance.
    Command { payload: CommandPayload },
    /// Ask the backend to re-broadcast an event on the bus.
    Event { event_type: String, payload: Value },
}

impl CommandRequest {
    /// Build a command request for an utterance.
    pub fn command(text: impl Into<String>, state: AssistantState) -> Self {
        Self::Command {
            payload: CommandPayload {
                text: text.into(),
                state,
            },
        }
    }
}
