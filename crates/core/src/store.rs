//! MessageStore trait: the append-only conversation history.
//!
//! The store owns persistence, ordering and pagination. The engine only
//! appends new messages and lists a conversation's history in creation order.

use crate::error::StoreError;
use crate::message::{ConversationId, Message};
use async_trait::async_trait;

/// The core MessageStore trait.
///
/// Implementations: in-memory (for testing and ephemeral sessions), or any
/// database-backed store owned by the embedding application.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "postgres").
    fn name(&self) -> &str;

    /// Append a message and return it as stored (with `seq` assigned).
    async fn append(
        &self,
        conversation_id: &ConversationId,
        message: Message,
    ) -> std::result::Result<Message, StoreError>;

    /// List a conversation's messages in creation order.
    ///
    /// With `llm_only`, messages not meant for the model are skipped.
    async fn list(
        &self,
        conversation_id: &ConversationId,
        llm_only: bool,
    ) -> std::result::Result<Vec<Message>, StoreError>;
}
