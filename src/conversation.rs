use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::models::ChatMessage;

/// Read side of conversation history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The last `n` turns of a conversation, oldest first.
    async fn recent_turns(&self, conversation_id: &str, n: usize) -> Result<Vec<ChatMessage>>;
}

/// Process-local history, keyed by conversation id.
#[derive(Default)]
pub struct InMemoryConversations {
    turns: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, conversation_id: &str, message: ChatMessage) {
        self.turns
            .write()
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }

    /// Record one question/answer exchange.
    pub fn record_exchange(&self, conversation_id: &str, question: &str, answer: &str) {
        let mut turns = self.turns.write();
        let history = turns.entry(conversation_id.to_string()).or_default();
        history.push(ChatMessage::user(question));
        history.push(ChatMessage::assistant(answer));
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversations {
    async fn recent_turns(&self, conversation_id: &str, n: usize) -> Result<Vec<ChatMessage>> {
        let turns = self.turns.read();
        let Some(history) = turns.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let start = history.len().saturating_sub(n);
        Ok(history[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_turns_keeps_tail_in_order() {
        let store = InMemoryConversations::new();
        store.record_exchange("c1", "q1", "a1");
        store.record_exchange("c1", "q2", "a2");

        let turns = store.recent_turns("c1", 3).await.unwrap();
        assert_eq!(
            turns,
            vec![
                ChatMessage::assistant("a1"),
                ChatMessage::user("q2"),
                ChatMessage::assistant("a2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_empty() {
        let store = InMemoryConversations::new();
        store.append("c1", ChatMessage::user("hi"));
        assert!(store.recent_turns("other", 5).await.unwrap().is_empty());
        assert_eq!(store.recent_turns("c1", 0).await.unwrap().len(), 0);
    }
}
