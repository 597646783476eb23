//! Tool dispatch for the CLI.
//!
//! The CLI ships tool schemas but no tool implementations, so every call is
//! answered with an error result the model can read and recover from.

use async_trait::async_trait;
use continuum_core::error::ToolError;
use continuum_core::message::{ConversationId, Message, MessageToolCall};
use continuum_core::tool::ToolDispatcher;
use tracing::info;

/// Answers every tool call with "not available".
pub struct UnavailableDispatcher;

#[async_trait]
impl ToolDispatcher for UnavailableDispatcher {
    async fn dispatch(
        &self,
        conversation_id: &ConversationId,
        calls: &[MessageToolCall],
    ) -> Result<Vec<Message>, ToolError> {
        Ok(calls
            .iter()
            .map(|call| {
                info!(conversation_id = %conversation_id, tool = %call.name, "Tool not available in CLI");
                Message::tool_result(
                    &call.id,
                    format!(
                        "Error: tool '{}' is not available in this session. Answer without it.",
                        call.name
                    ),
                )
            })
            .collect())
    }
}
