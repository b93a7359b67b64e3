//! Assistant conversational state and the frontend state machine.
//!
//! The backend decides transitions; the frontend holds the authoritative
//! copy and mirrors every change onto the event bus. Only actions received
//! in backend replies move the state.

use crate::ipc::protocol::Action;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The assistant's conversational state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssistantState {
    /// Waiting for an activation phrase; everything else is ignored.
    #[default]
    Dormant,
    /// Actively accepting commands.
    Listening,
}

impl AssistantState {
    /// Wire representation, matching the serde encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dormant => "DORMANT",
            Self::Listening => "LISTENING",
        }
    }
}

impl fmt::Display for AssistantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of feeding one backend action into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed; the new state must be broadcast.
    Changed(AssistantState),
    /// State unchanged.
    Unchanged,
    /// The assistant should begin graceful shutdown.
    Exit,
}

/// Frontend-held state machine driven by backend replies.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: AssistantState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> AssistantState {
        self.state
    }

    /// Apply a backend action.
    ///
    /// `ACTIVATE` and `DEACTIVATE` only move the state in the expected
    /// direction; a redundant action (activate while already listening) is
    /// reported as `Unchanged` so no spurious `state.changed` is broadcast.
    pub fn apply(&mut self, action: Action) -> Transition {
        match (action, self.state) {
            (Action::Activate, AssistantState::Dormant) => {
                self.state = AssistantState::Listening;
                Transition::Changed(self.state)
            }
            (Action::Deactivate, AssistantState::Listening) => {
                self.state = AssistantState::Dormant;
                Transition::Changed(self.state)
            }
            (Action::Exit, _) => Transition::Exit,
            _ => Transition::Unchanged,
        }
    }
}

/// Normalize raw STT or typed text into a dispatchable utterance.
///
/// Lowercased and whitespace-trimmed; empty results are dropped by callers.
pub fn normalize_utterance(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_dormant() {
        assert_eq!(StateMachine::new().state(), AssistantState::Dormant);
    }

    #[test]
    fn activate_then_deactivate() {
        let mut machine = StateMachine::new();
        assert_eq!(
            machine.apply(Action::Activate),
            Transition::Changed(AssistantState::Listening)
        );
        assert_eq!(
            machine.apply(Action::Deactivate),
            Transition::Changed(AssistantState::Dormant)
        );
    }

    #[test]
    fn redundant_transitions_are_unchanged() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.apply(Action::Deactivate), Transition::Unchanged);
        machine.apply(Action::Activate);
        assert_eq!(machine.apply(Action::Activate), Transition::Unchanged);
    }

    #[test]
    fn command_and_ignore_leave_state_alone() {
        let mut machine = StateMachine::new();
        machine.apply(Action::Activate);
        assert_eq!(machine.apply(Action::Command), Transition::Unchanged);
        assert_eq!(machine.apply(Action::Ignore), Transition::Unchanged);
        assert_eq!(machine.state(), AssistantState::Listening);
    }

    #[test]
    fn exit_from_any_state() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.apply(Action::Exit), Transition::Exit);
        machine.apply(Action::Activate);
        assert_eq!(machine.apply(Action::Exit), Transition::Exit);
    }

    #[test]
    fn state_serializes_uppercase() {
        let value = serde_json::to_value(AssistantState::Listening).expect("serialize");
        assert_eq!(value, serde_json::json!("LISTENING"));
        let parsed: AssistantState =
            serde_json::from_value(serde_json::json!("DORMANT")).expect("deserialize");
        assert_eq!(parsed, AssistantState::Dormant);
    }

    #[test]
    fn utterances_are_lowercased_and_trimmed() {
        assert_eq!(normalize_utterance("  Hey Assist  "), "hey assist");
        assert_eq!(normalize_utterance(""), "");
    }
}
