//! Discord adapter (serenity).
//!
//! This crate implements the `fdb-core` messaging and connection ports over the
//! Discord HTTP API and gateway.

use std::sync::Arc;

use async_trait::async_trait;

use serenity::{
    all::{ChannelType, GuildChannel},
    http::Http,
};

pub mod connection;
pub mod handler;

use fdb_core::{
    domain::{ChannelRef, GuildId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChannelInfo, ChannelKind, MessagingCapabilities},
    },
    Result,
};

/// Discord rejects longer message bodies.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

#[derive(Clone)]
pub struct DiscordMessenger {
    http: Arc<Http>,
}

impl DiscordMessenger {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn channel_id(channel: ChannelRef) -> Result<serenity::all::ChannelId> {
        if channel.0 == 0 {
            return Err(Error::External("invalid discord channel id 0".to_string()));
        }
        Ok(serenity::all::ChannelId::new(channel.0))
    }

    fn guild_id(guild: GuildId) -> Result<serenity::all::GuildId> {
        if guild.0 == 0 {
            return Err(Error::Config("invalid discord guild id 0".to_string()));
        }
        Ok(serenity::all::GuildId::new(guild.0))
    }

    fn map_err(e: serenity::Error) -> Error {
        Error::External(format!("discord error: {e}"))
    }
}

#[async_trait]
impl MessagingPort for DiscordMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: DISCORD_MESSAGE_LIMIT,
        }
    }

    async fn send_text(&self, channel: ChannelRef, text: &str) -> Result<MessageRef> {
        let msg = Self::channel_id(channel)?
            .say(&self.http, text)
            .await
            .map_err(Self::map_err)?;

        Ok(MessageRef {
            channel,
            message_id: MessageId(msg.id.get()),
        })
    }

    async fn list_channels(&self, guild: GuildId) -> Result<Vec<ChannelInfo>> {
        let channels = self
            .http
            .get_channels(Self::guild_id(guild)?)
            .await
            .map_err(Self::map_err)?;

        Ok(channels.into_iter().map(channel_info).collect())
    }
}

fn channel_info(c: GuildChannel) -> ChannelInfo {
    ChannelInfo {
        id: ChannelRef(c.id.get()),
        kind: channel_kind(c.kind),
        name: c.name,
    }
}

/// Announcement channels take plain messages too, so they count as text.
fn channel_kind(kind: ChannelType) -> ChannelKind {
    match kind {
        ChannelType::Text | ChannelType::News => ChannelKind::Text,
        ChannelType::Voice | ChannelType::Stage => ChannelKind::Voice,
        ChannelType::Category => ChannelKind::Category,
        _ => ChannelKind::Other,
    }
}
