//! Discord gateway event handler.
//!
//! Forwards every created message to the core command responder. Serenity runs
//! each event on its own task, so replies never wait on the relay loop.

use std::sync::{Arc, Mutex};

use serenity::{
    all::{Context, EventHandler, GatewayIntents, Message, Ready},
    async_trait,
};

use tokio::sync::oneshot;

use fdb_core::{
    domain::{ChannelRef, InboundMessage, UserId},
    responder::CommandResponder,
};

pub struct DiscordHandler {
    responder: Arc<CommandResponder>,
    ready: Mutex<Option<oneshot::Sender<()>>>,
}

impl DiscordHandler {
    /// `ready` fires on the first gateway `READY` only.
    pub fn new(responder: Arc<CommandResponder>, ready: oneshot::Sender<()>) -> Self {
        Self {
            responder,
            ready: Mutex::new(Some(ready)),
        }
    }

    /// Returns false on reconnects, when the startup waiter was already told.
    fn mark_ready(&self) -> bool {
        let tx = match self.ready.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match tx {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Gateway intents the bridge needs: guild and DM messages with content.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
    }
}

pub(crate) fn inbound(channel_id: u64, author_id: u64, content: String) -> InboundMessage {
    InboundMessage {
        channel: ChannelRef(channel_id),
        author: UserId(author_id),
        content,
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "discord gateway ready"
        );
        if !self.mark_ready() {
            tracing::debug!("discord gateway resumed");
        }
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let inbound = inbound(msg.channel_id.get(), msg.author.id.get(), msg.content);
        self.responder.handle(&inbound).await;
    }
}
