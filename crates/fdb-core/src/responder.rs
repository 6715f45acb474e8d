//! Fixed keyword replies for inbound chat messages.

use std::sync::Arc;

use crate::{
    domain::{InboundMessage, UserId},
    messaging::port::MessagingPort,
};

/// Keyword → reply. Matching is exact and case-sensitive.
const REPLIES: &[(&str, &str)] = &[("ping", "Pong!"), ("pong", "Ping!")];

/// Reply for `content`, if it is one of the known keywords.
pub fn reply_for(content: &str) -> Option<&'static str> {
    REPLIES
        .iter()
        .find(|(keyword, _)| *keyword == content)
        .map(|(_, reply)| *reply)
}

/// Answers keyword messages on the channel they arrived on.
pub struct CommandResponder {
    own_id: UserId,
    messenger: Arc<dyn MessagingPort>,
}

impl CommandResponder {
    pub fn new(own_id: UserId, messenger: Arc<dyn MessagingPort>) -> Self {
        Self { own_id, messenger }
    }

    /// Reply for a message, or `None`. Our own messages never get one, so the
    /// bridge cannot talk to itself.
    pub fn respond(&self, msg: &InboundMessage) -> Option<&'static str> {
        if msg.author == self.own_id {
            return None;
        }
        reply_for(&msg.content)
    }

    /// Handle one inbound message, sending at most one reply.
    pub async fn handle(&self, msg: &InboundMessage) {
        let Some(reply) = self.respond(msg) else {
            return;
        };

        tracing::debug!(
            channel = msg.channel.0,
            author = msg.author.0,
            reply,
            "answering command"
        );
        if let Err(e) = self.messenger.send_text(msg.channel, reply).await {
            tracing::warn!(channel = msg.channel.0, error = %e, "failed to send command reply");
        }
    }
}
