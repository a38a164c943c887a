//! Telegram message handler registered in the teloxide Dispatcher.
//!
//! Extracts a routing key via `bridge_channels::Router`, opens or reuses
//! the tmux window it maps to, and injects the message text as keystrokes
//! (spec.md §2's inbound half of the data flow — there is no LLM call
//! here, Telegram is a keyboard into an already-running `claude` session).

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::warn;

use bridge_channels::{ChatKind, InboundContext, Router};
use bridge_core::config::ResolvedAgent;
use bridge_core::types::RoutingKey;
use bridge_terminal::Multiplexer;

use crate::allow::is_allowed;
use crate::send::send_response;

/// Host hook for turning a routing key with no bound window into a live
/// tmux session. The gateway binary owns the workspace root, the launch
/// command, and window binding; this crate only speaks Telegram.
#[async_trait]
pub trait WindowOpener: Send + Sync {
    async fn open_window(&self, key: &RoutingKey) -> Result<String, String>;
}

/// Main message handler registered in the teloxide Dispatcher.
///
/// Runs for every incoming `Message`:
/// 1. Bot-message filter.
/// 2. Allowlist check (deny-by-default).
/// 3. DM guard.
/// 4. Routing-key extraction via the agent's `Router`; rejects messages
///    from unnamed forum threads, general chats, or disallowed chat kinds.
/// 5. `require_mention` guard for groups.
/// 6. Window lookup, opening a new tmux session on first contact.
/// 7. Keystroke injection.
pub async fn handle_message<O: WindowOpener + 'static>(
    bot: Bot,
    msg: Message,
    settings: Arc<ResolvedAgent>,
    router: Arc<dyn Router>,
    multiplexer: Arc<dyn Multiplexer>,
    opener: Arc<O>,
) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }

    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    if !is_allowed(&settings.allowed_users, from.id.0 as i64) {
        return Ok(());
    }

    if msg.chat.is_private() && !settings.dm_allowed {
        return Ok(());
    }

    let thread_id = msg.thread_id.map(|t| i64::from(t.0 .0));
    let ctx = InboundContext {
        user_id: from.id.0.to_string(),
        chat_id: msg.chat.id.0,
        chat_kind: chat_kind(&msg),
        thread_id,
        is_forum: msg.chat.is_forum(),
    };

    let Some(key) = router.extract(&ctx) else {
        send_response(&bot, msg.chat.id, thread_id, router.rejection_message()).await;
        return Ok(());
    };

    if matches!(ctx.chat_kind, ChatKind::Group | ChatKind::Supergroup) && settings.require_mention {
        let text_for_mention = msg.text().or_else(|| msg.caption()).unwrap_or("");
        let bot_username = bot
            .get_me()
            .await
            .ok()
            .and_then(|me| me.user.username.clone())
            .unwrap_or_default();
        if !contains_mention(text_for_mention, &bot_username) {
            return Ok(());
        }
    }

    let text = msg.text().or_else(|| msg.caption()).unwrap_or("").trim();
    if text.is_empty() {
        return Ok(());
    }

    let window_id = match router.get_window(&key) {
        Some(w) => w.as_str().to_string(),
        None => match opener.open_window(&key).await {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "failed to open a session for inbound Telegram message");
                send_response(&bot, msg.chat.id, thread_id, "Could not start a session for this chat.").await;
                return Ok(());
            }
        },
    };

    if let Err(e) = multiplexer.send_keys(&window_id, text, true).await {
        warn!(error = %e, window_id, "failed to forward Telegram message into tmux session");
    }

    Ok(())
}

fn chat_kind(msg: &Message) -> ChatKind {
    if msg.chat.is_private() {
        ChatKind::Private
    } else if msg.chat.is_supergroup() {
        ChatKind::Supergroup
    } else {
        ChatKind::Group
    }
}

/// Return `true` if `text` contains a `@bot_username` mention.
fn contains_mention(text: &str, bot_username: &str) -> bool {
    if bot_username.is_empty() {
        return false;
    }
    let mention = format!("@{bot_username}");
    text.contains(&mention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_mention_positive() {
        assert!(contains_mention("Hey @mybot, help!", "mybot"));
    }

    #[test]
    fn contains_mention_negative() {
        assert!(!contains_mention("Hello there", "mybot"));
    }

    #[test]
    fn contains_mention_empty_username() {
        assert!(!contains_mention("@foo bar", ""));
    }
}
