//! `DeliverySink` implementation (spec.md §4.H) — the platform side of the
//! Delivery Pipeline. Turns queued content/status/typing tasks into actual
//! Telegram Bot API calls, one `Bot` per configured agent since each agent
//! owns its own bot token.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tracing::warn;

use bridge_core::types::Destination;
use bridge_delivery::{DeliverySink, MessageId, PlatformError, Result};

use crate::send::{send_chunk, split_chunks_smart};

/// One `Bot` per agent name, keyed the same way `Destination::agent` names it.
pub struct TelegramSink {
    bots: HashMap<String, Bot>,
}

impl TelegramSink {
    pub fn new(bots: HashMap<String, Bot>) -> Self {
        Self { bots }
    }

    fn bot_for(&self, dest: &Destination) -> Result<&Bot> {
        self.bots
            .get(&dest.agent)
            .ok_or_else(|| PlatformError::Permanent(format!("no Telegram bot configured for agent '{}'", dest.agent)))
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn send_text(&self, dest: &Destination, text: &str) -> Result<MessageId> {
        let bot = self.bot_for(dest)?;
        let chat_id = ChatId(dest.chat_id);

        let mut first_id = None;
        for chunk in split_chunks_smart(text) {
            let id = send_chunk(bot, chat_id, dest.thread_id, &chunk).await.map_err(to_platform_error)?;
            first_id.get_or_insert(i64::from(id.0));
        }
        first_id.ok_or_else(|| PlatformError::Permanent("refused to send an empty message".into()))
    }

    async fn edit_text(&self, dest: &Destination, message_id: MessageId, text: &str) -> Result<()> {
        let bot = self.bot_for(dest)?;
        bot.edit_message_text(ChatId(dest.chat_id), teloxide::types::MessageId(message_id as i32), text)
            .await
            .map(|_| ())
            .map_err(to_platform_error)
    }

    async fn delete_message(&self, dest: &Destination, message_id: MessageId) -> Result<()> {
        let bot = self.bot_for(dest)?;
        bot.delete_message(ChatId(dest.chat_id), teloxide::types::MessageId(message_id as i32))
            .await
            .map(|_| ())
            .map_err(to_platform_error)
    }

    async fn send_typing(&self, dest: &Destination) {
        let Ok(bot) = self.bot_for(dest) else { return };
        if let Err(e) = bot.send_chat_action(ChatId(dest.chat_id), ChatAction::Typing).await {
            warn!(error = %e, %dest, "failed to send typing indicator");
        }
    }
}

/// Telegram's `RetryAfter` maps onto the pipeline's flood-control sleep;
/// network/IO errors are retried by the worker; everything else (bad
/// request, message gone, etc.) is not worth retrying.
fn to_platform_error(err: teloxide::RequestError) -> PlatformError {
    match err {
        teloxide::RequestError::RetryAfter(seconds) => PlatformError::Flood(Duration::from(seconds)),
        teloxide::RequestError::Network(e) => PlatformError::Transient(e.to_string()),
        teloxide::RequestError::Io(e) => PlatformError::Transient(e.to_string()),
        other => PlatformError::Permanent(other.to_string()),
    }
}
