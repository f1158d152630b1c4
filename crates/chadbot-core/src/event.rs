//! Broadcast events and subject-pattern matching.
//!
//! Events are fire-and-forget records tagged with a dot-separated subject
//! (`chat.message.received`). Plugins subscribe with patterns; delivery is
//! at-most-once and never persisted.
//!
//! # Pattern grammar
//!
//! - A literal pattern matches only the equal subject.
//! - A trailing `.*` matches exactly one additional non-empty segment:
//!   `chat.message.*` matches `chat.message.sent`, not `chat.message` and
//!   not `chat.message.sent.twice`.
//! - A trailing `.#` matches zero or more additional segments.
//!
//! Concrete event subjects never contain wildcards.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =============================================================================
// Event record
// =============================================================================

/// Structured payload for chat-message events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub platform: String,
    pub chat_id: String,
    pub message_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// The typed payload variants an event can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    ChatMessage(ChatMessageEvent),
    Generic {
        event_name: String,
        payload: serde_json::Value,
    },
}

/// A subject-tagged broadcast record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub subject: String,
    /// Plugin ID of the publisher; stamped by the broker on emit.
    #[serde(default)]
    pub source_plugin: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub data: EventData,
}

impl Event {
    /// Creates an event with the current timestamp and an empty source
    /// (the broker stamps the source on publish).
    pub fn new(subject: impl Into<String>, data: EventData) -> Self {
        Self {
            subject: subject.into(),
            source_plugin: String::new(),
            timestamp_ms: now_ms(),
            data,
        }
    }

    /// Creates a generic event from a name and JSON payload.
    pub fn generic(subject: impl Into<String>, event_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(
            subject,
            EventData::Generic {
                event_name: event_name.into(),
                payload,
            },
        )
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// =============================================================================
// Subject matching
// =============================================================================

/// Returns whether `pattern` matches the concrete `subject`.
///
/// Segment-wise walk, no backtracking: `*` consumes exactly one segment,
/// `#` (final segment only) consumes the rest.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    if pattern.is_empty() || subject.is_empty() {
        return false;
    }

    let mut pat = pattern.split('.');
    let mut sub = subject.split('.').peekable();

    loop {
        match pat.next() {
            None => return sub.peek().is_none(),
            Some("#") => {
                // Only valid as the terminal token; anything after it can
                // never match because `#` swallows the remaining subject.
                return pat.next().is_none();
            }
            Some("*") => match sub.next() {
                Some(seg) if !seg.is_empty() => {}
                _ => return false,
            },
            Some(token) => match sub.next() {
                Some(seg) if seg == token => {}
                _ => return false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(subject_matches("chat.message.sent", "chat.message.sent"));
        assert!(!subject_matches("chat.message.sent", "chat.message.received"));
        assert!(!subject_matches("chat.message", "chat.message.sent"));
    }

    #[test]
    fn single_segment_wildcard() {
        assert!(subject_matches("chat.message.*", "chat.message.sent"));
        assert!(subject_matches("chat.message.*", "chat.message.received"));
        assert!(!subject_matches("chat.message.*", "chat.message"));
        assert!(!subject_matches("chat.message.*", "chat.message.sent.twice"));
        assert!(!subject_matches("chat.message.*", "chat.other.sent"));
    }

    #[test]
    fn tail_wildcard() {
        assert!(subject_matches("chat.#", "chat"));
        assert!(subject_matches("chat.#", "chat.message"));
        assert!(subject_matches("chat.#", "chat.message.sent.twice"));
        assert!(!subject_matches("chat.#", "plugin.loaded"));
    }

    #[test]
    fn empty_segments_do_not_match_wildcard() {
        assert!(!subject_matches("chat.*", "chat."));
        assert!(!subject_matches("", "chat"));
        assert!(!subject_matches("chat", ""));
    }

    #[test]
    fn chat_message_event_round_trips() {
        let event = Event::new(
            "chat.message.received",
            EventData::ChatMessage(ChatMessageEvent {
                platform: "telegram".into(),
                chat_id: "42".into(),
                message_id: "m1".into(),
                sender_id: "u7".into(),
                sender_name: Some("alice".into()),
                content: "hi".into(),
                content_type: "text".into(),
                reply_to: None,
                metadata: None,
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"chat_message\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
