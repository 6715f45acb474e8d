use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::Error;

/// Discord user id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub u64);

/// Discord guild id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GuildId(pub u64);

/// Discord channel id (snowflake). Used both as the relay destination and as
/// the reply target for inbound commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelRef(pub u64);

/// Discord message id (snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub u64);

/// A stable reference to a sent message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel: ChannelRef,
    pub message_id: MessageId,
}

/// One line read from the followed file.
///
/// When `err` is set the read failed and `text` must not be used.
#[derive(Debug)]
pub struct RawLine {
    pub text: String,
    pub read_at: DateTime<Utc>,
    pub err: Option<Error>,
}

impl RawLine {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            read_at: Utc::now(),
            err: None,
        }
    }

    pub fn failed(err: Error) -> Self {
        Self {
            text: String::new(),
            read_at: Utc::now(),
            err: Some(err),
        }
    }
}

/// A message delivered to the bridge by the chat platform.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub channel: ChannelRef,
    pub author: UserId,
    pub content: String,
}

/// Where the follower starts reading the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartPosition {
    /// Replay the whole file.
    Start,
    /// Only lines appended after startup.
    End,
    /// Absolute byte offset.
    Offset(u64),
}

impl FromStr for StartPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" | "beginning" => Ok(Self::Start),
            "end" => Ok(Self::End),
            other => other.parse::<u64>().map(Self::Offset).map_err(|_| {
                Error::Config(format!(
                    "invalid start position {other:?} (expected start, end or a byte offset)"
                ))
            }),
        }
    }
}
