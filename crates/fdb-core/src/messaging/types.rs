use crate::domain::ChannelRef;

/// Kind of a guild channel, reduced to what the bridge cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    Other,
}

/// A channel as listed by the platform for a guild.
#[derive(Clone, Debug)]
pub struct ChannelInfo {
    pub id: ChannelRef,
    pub name: String,
    pub kind: ChannelKind,
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
}

/// First text channel whose name matches exactly.
pub fn resolve_channel(channels: &[ChannelInfo], name: &str) -> Option<ChannelRef> {
    channels
        .iter()
        .find(|c| c.kind == ChannelKind::Text && c.name == name)
        .map(|c| c.id)
}

/// Clamp `text` to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}
