use async_trait::async_trait;
use bridge_core::types::Destination;

use crate::error::Result;
use crate::types::MessageId;

/// The transport a destination's worker speaks through. Implemented once
/// per chat platform (`bridge-telegram`'s adapter implements this over
/// `teloxide`); the worker itself never talks to a platform SDK directly.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Send plain text, returning the platform message id for later edits.
    async fn send_text(&self, dest: &Destination, text: &str) -> Result<MessageId>;

    /// Edit a previously sent message's text in place.
    async fn edit_text(&self, dest: &Destination, message_id: MessageId, text: &str) -> Result<()>;

    /// Delete a previously sent message.
    async fn delete_message(&self, dest: &Destination, message_id: MessageId) -> Result<()>;

    /// Best-effort "typing…" indicator; failures are not worth surfacing.
    async fn send_typing(&self, dest: &Destination);
}
