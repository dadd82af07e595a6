//! Per-session conversation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered, append-only log of turns. Unbounded; the prompt composer
/// decides how much of it fits into a request.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(ConversationTurn {
            question: question.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        });
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_order() {
        let mut memory = ConversationMemory::new();
        assert!(memory.is_empty());

        memory.append("first?", "one");
        memory.append("second?", "two");

        assert_eq!(memory.len(), 2);
        let turns = memory.turns();
        assert_eq!(turns[0].question, "first?");
        assert_eq!(turns[1].answer, "two");
        assert!(turns[0].timestamp <= turns[1].timestamp);
    }

    #[test]
    fn test_clear() {
        let mut memory = ConversationMemory::new();
        memory.append("q", "a");
        memory.clear();
        assert!(memory.is_empty());
        assert!(memory.turns().is_empty());
    }
}
