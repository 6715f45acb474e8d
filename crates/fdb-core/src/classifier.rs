//! Picks chat lines out of the server log.

use crate::{domain::RawLine, Error};

/// Marker Factorio writes in front of player chat.
pub const DEFAULT_MARKER: &str = "[CHAT]";

/// Extract the chat payload from a log line.
///
/// - read error: `Err`, the caller skips the line
/// - marker present: the text after the first marker occurrence, or `None`
///   when nothing follows it
/// - marker absent: `Ok(None)`
pub fn classify<'a>(line: &'a RawLine, marker: &str) -> Result<Option<&'a str>, &'a Error> {
    if let Some(err) = &line.err {
        return Err(err);
    }
    Ok(extract_payload(&line.text, marker))
}

/// Text-only half of [`classify`].
pub fn extract_payload<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let (_, payload) = text.split_once(marker)?;
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Outbound text for a payload: the tag followed by the payload without its
/// leading padding. A blank payload still yields the bare tag.
pub fn format_relay(tag: &str, payload: &str) -> String {
    format!("{tag}{}", payload.trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_without_marker_are_ignored() {
        for text in [
            "",
            "2021-01-01 12:00:00 [JOIN] alice",
            "2021-01-01 12:00:00 [LEAVE] bob",
            "[chat] lower case marker",
            "CHAT] half a marker",
        ] {
            let line = RawLine::ok(text);
            assert!(matches!(classify(&line, DEFAULT_MARKER), Ok(None)), "{text}");
        }
    }

    #[test]
    fn returns_text_after_marker() {
        let line = RawLine::ok("2021-01-01 12:00:00 [CHAT] alice: hello");
        assert_eq!(
            classify(&line, DEFAULT_MARKER).unwrap(),
            Some(" alice: hello")
        );

        let line = RawLine::ok("[CHAT]x");
        assert_eq!(classify(&line, DEFAULT_MARKER).unwrap(), Some("x"));
    }

    #[test]
    fn splits_on_first_marker_only() {
        let line = RawLine::ok("t [CHAT] bob: what is [CHAT]?");
        assert_eq!(
            classify(&line, DEFAULT_MARKER).unwrap(),
            Some(" bob: what is [CHAT]?")
        );
    }

    #[test]
    fn marker_at_end_has_no_payload() {
        let line = RawLine::ok("2021-01-01 12:00:00 [CHAT]");
        assert!(matches!(classify(&line, DEFAULT_MARKER), Ok(None)));
    }

    #[test]
    fn read_error_wins_over_text() {
        let mut line = RawLine::failed(Error::External("boom".to_string()));
        line.text = "2021-01-01 12:00:00 [CHAT] alice: hello".to_string();
        assert!(classify(&line, DEFAULT_MARKER).is_err());
    }

    #[test]
    fn custom_marker() {
        assert_eq!(extract_payload("<say> hi", "<say>"), Some(" hi"));
        assert_eq!(extract_payload("[CHAT] hi", "<say>"), None);
    }

    #[test]
    fn relay_text_is_tagged_and_left_trimmed() {
        assert_eq!(
            format_relay("[Factorio]", " alice: hello"),
            "[Factorio]alice: hello"
        );
        assert_eq!(format_relay("[Factorio]", "   "), "[Factorio]");
    }
}
