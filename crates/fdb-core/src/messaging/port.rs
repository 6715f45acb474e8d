use async_trait::async_trait;

use crate::{
    domain::{ChannelRef, GuildId, MessageRef},
    messaging::types::{ChannelInfo, MessagingCapabilities},
    Result,
};

/// Outbound chat port.
///
/// Implementations must be safe to share between the relay task and the
/// inbound event handlers.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, channel: ChannelRef, text: &str) -> Result<MessageRef>;

    /// Channels of a guild, in the order the platform lists them.
    async fn list_channels(&self, guild: GuildId) -> Result<Vec<ChannelInfo>>;
}
