//! `ChatProbe` implementation — lets the router confirm a forum topic is
//! still alive before handing out its routing key again (spec.md §4.D).

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatAction;

use bridge_channels::ChatProbe;

pub struct TelegramChatProbe {
    bot: Bot,
}

impl TelegramChatProbe {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatProbe for TelegramChatProbe {
    async fn topic_exists(&self, chat_id: i64, thread_id: i64) -> bool {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .message_thread_id(thread_id as i32)
            .await
            .is_ok()
    }
}
