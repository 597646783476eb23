//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use continuum_core::error::StoreError;
use continuum_core::message::{ConversationId, Message};
use continuum_core::store::MessageStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

/// An append-only store keeping each conversation in a Vec.
///
/// Unknown conversations list as empty; the first append creates them.
#[derive(Clone)]
pub struct InMemoryStore {
    conversations: Arc<RwLock<HashMap<ConversationId, Vec<Message>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of messages stored for a conversation (visible or not).
    pub async fn len(&self, conversation_id: &ConversationId) -> usize {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map_or(0, Vec::len)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(
        &self,
        conversation_id: &ConversationId,
        mut message: Message,
    ) -> Result<Message, StoreError> {
        let mut conversations = self.conversations.write().await;
        let messages = conversations.entry(conversation_id.clone()).or_default();
        message.seq = messages.last().map_or(1, |m| m.seq + 1);
        trace!(conversation_id = %conversation_id, seq = message.seq, "Appending message");
        messages.push(message.clone());
        Ok(message)
    }

    async fn list(
        &self,
        conversation_id: &ConversationId,
        llm_only: bool,
    ) -> Result<Vec<Message>, StoreError> {
        let conversations = self.conversations.read().await;
        let Some(messages) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        Ok(messages
            .iter()
            .filter(|m| !llm_only || m.llm_visible)
            .cloned()
            .collect())
    }
}
