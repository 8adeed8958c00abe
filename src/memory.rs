//! Conversation memory: an ordered, token-bounded sequence of chat turns.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Who produced a chat turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Approximate token count (four characters per token, rounded up).
    pub fn estimated_tokens(&self) -> usize {
        self.content.chars().count().div_ceil(4)
    }
}

/// Ordered chat turns bounded by an approximate token budget.
///
/// Appending past the budget evicts the oldest turns first. The newest turn is
/// always kept, even when it alone exceeds the budget.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<ChatTurn>,
    token_limit: usize,
    total_tokens: usize,
}

impl ConversationMemory {
    /// Create an empty memory with the given token budget.
    pub fn new(token_limit: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            token_limit,
            total_tokens: 0,
        }
    }

    /// Create a memory seeded with an assistant greeting.
    pub fn with_greeting(token_limit: usize, greeting: &str) -> Self {
        let mut memory = Self::new(token_limit);
        if !greeting.trim().is_empty() {
            memory.append(ChatTurn::assistant(greeting));
        }
        memory
    }

    /// Append a turn, evicting the oldest turns while over budget.
    pub fn append(&mut self, turn: ChatTurn) {
        self.total_tokens += turn.estimated_tokens();
        self.turns.push_back(turn);

        while self.total_tokens > self.token_limit && self.turns.len() > 1 {
            if let Some(evicted) = self.turns.pop_front() {
                self.total_tokens -= evicted.estimated_tokens();
                debug!(
                    role = %evicted.role,
                    remaining = self.turns.len(),
                    "Evicted oldest turn from conversation memory"
                );
            }
        }
    }

    /// Snapshot of the turns, oldest first.
    pub fn get(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }

    /// Number of stored turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Approximate tokens currently held.
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    /// Whether any user turn is still held.
    pub fn has_user_turn(&self) -> bool {
        self.turns.iter().any(|t| t.role == Role::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimate_rounds_up() {
        assert_eq!(ChatTurn::user("").estimated_tokens(), 0);
        assert_eq!(ChatTurn::user("abc").estimated_tokens(), 1);
        assert_eq!(ChatTurn::user("abcde").estimated_tokens(), 2);
        // Counted in characters, not bytes
        assert_eq!(ChatTurn::user("📚📚📚📚").estimated_tokens(), 1);
    }

    #[test]
    fn test_greeting_seed() {
        let memory = ConversationMemory::with_greeting(100, "Ask me a question!");
        assert_eq!(memory.get(), vec![ChatTurn::assistant("Ask me a question!")]);
        assert!(!memory.has_user_turn());

        let memory = ConversationMemory::with_greeting(100, "  ");
        assert!(memory.is_empty());
    }

    #[test]
    fn test_append_preserves_order() {
        let mut memory = ConversationMemory::new(1000);
        memory.append(ChatTurn::user("one"));
        memory.append(ChatTurn::assistant("two"));
        memory.append(ChatTurn::user("three"));

        let contents: Vec<_> = memory.get().into_iter().map(|t| t.content).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_evicts_oldest_when_over_budget() {
        // Each turn is 8 chars = 2 tokens; budget allows 3 turns
        let mut memory = ConversationMemory::new(6);
        for content in ["turn-001", "turn-002", "turn-003", "turn-004"] {
            memory.append(ChatTurn::user(content));
        }

        let contents: Vec<_> = memory.get().into_iter().map(|t| t.content).collect();
        assert_eq!(contents, vec!["turn-002", "turn-003", "turn-004"]);
        assert_eq!(memory.total_tokens(), 6);
    }

    #[test]
    fn test_oversized_turn_is_kept_alone() {
        let mut memory = ConversationMemory::new(2);
        memory.append(ChatTurn::user("short"));
        memory.append(ChatTurn::assistant("x".repeat(100)));

        assert_eq!(memory.len(), 1);
        assert_eq!(memory.get()[0].role, Role::Assistant);
    }
}
