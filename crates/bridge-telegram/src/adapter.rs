//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling event
//! loop until the process exits. Every inbound message is resolved to a
//! routing key via the agent's `Router` and forwarded as keystrokes into
//! the tmux window bound to that key.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::info;

use bridge_channels::Router;
use bridge_core::config::ResolvedAgent;
use bridge_terminal::Multiplexer;

use crate::handler::{handle_message, WindowOpener};

/// Wraps a teloxide `Bot` and drives the Dispatcher event loop until the
/// process exits. Long polling — no public URL required.
pub struct TelegramAdapter<O: WindowOpener + 'static> {
    bot: Bot,
    settings: Arc<ResolvedAgent>,
    router: Arc<dyn Router>,
    multiplexer: Arc<dyn Multiplexer>,
    opener: Arc<O>,
}

impl<O: WindowOpener + 'static> TelegramAdapter<O> {
    pub fn new(
        bot: Bot,
        settings: ResolvedAgent,
        router: Arc<dyn Router>,
        multiplexer: Arc<dyn Multiplexer>,
        opener: Arc<O>,
    ) -> Self {
        Self { bot, settings: Arc::new(settings), router, multiplexer, opener }
    }

    /// A clone of this adapter's bot client, for wiring a `DeliverySink` or
    /// `ChatProbe` that needs to talk to the same bot.
    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    /// Connect to Telegram and drive the long-polling loop.
    ///
    /// Never returns — runs for the lifetime of the process.
    pub async fn run(self) {
        info!(agent = %self.settings.name, "Telegram: starting long-polling dispatcher");

        let handler = Update::filter_message().endpoint(handle_message::<O>);

        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.settings, self.router, self.multiplexer, self.opener])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}
