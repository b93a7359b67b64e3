//! Short-term conversation history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::info;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Bounded ring buffer of conversation turns.
///
/// The bound counts messages, not exchanges: `exchanges` user/assistant
/// pairs means `2 × exchanges` stored turns. The oldest turns fall off as
/// new ones arrive.
#[derive(Debug)]
pub struct ConversationManager {
    history: VecDeque<ConversationTurn>,
    max_messages: usize,
}

impl ConversationManager {
    /// Create a manager holding up to `exchanges` user/assistant pairs.
    pub fn new(exchanges: usize) -> Self {
        let max_messages = exchanges.saturating_mul(2).max(2);
        info!("conversation history capped at {exchanges} exchanges");
        Self {
            history: VecDeque::with_capacity(max_messages),
            max_messages,
        }
    }

    /// Append a message, evicting the oldest when at capacity.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        if self.history.len() == self.max_messages {
            let _ = self.history.pop_front();
        }
        self.history.push_back(ConversationTurn {
            role,
            content: content.into(),
        });
    }

    /// Snapshot of the current history, oldest first.
    pub fn get_history(&self) -> Vec<ConversationTurn> {
        self.history.iter().cloned().collect()
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when no turns are stored.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Drop all stored turns.
    pub fn clear(&mut self) {
        self.history.clear();
        info!("conversation history cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_turns_in_order() {
        let mut manager = ConversationManager::new(5);
        manager.add_message(Role::User, "hello");
        manager.add_message(Role::Assistant, "hi there");
        let history = manager.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "hi there");
    }

    #[test]
    fn bound_is_twice_the_exchange_count() {
        let mut manager = ConversationManager::new(2);
        for i in 0..10 {
            manager.add_message(Role::User, format!("message {i}"));
        }
        assert_eq!(manager.len(), 4);
        // Oldest messages were evicted.
        assert_eq!(manager.get_history()[0].content, "message 6");
    }

    #[test]
    fn clear_is_idempotent() {
        let mut manager = ConversationManager::new(3);
        manager.add_message(Role::User, "hello");
        manager.clear();
        assert!(manager.is_empty());
        manager.clear();
        assert!(manager.is_empty());
    }

    #[test]
    fn zero_exchanges_still_holds_one_pair() {
        let mut manager = ConversationManager::new(0);
        manager.add_message(Role::User, "a");
        manager.add_message(Role::Assistant, "b");
        manager.add_message(Role::User, "c");
        assert_eq!(manager.len(), 2);
    }
}
