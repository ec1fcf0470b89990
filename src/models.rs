//! Core data types that flow from the source, through the local store, to
//! the replica.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A message as persisted in the local store.
///
/// `id` is assigned by the source and assumed unique across all chats;
/// the store keys on it alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    /// Seconds since the Unix epoch.
    pub date: i64,
    pub text: String,
}

impl Message {
    pub fn date_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }
}

/// An item produced by a [`MessageSource`](crate::source::MessageSource)
/// before filtering. `text` is `None` for service events and media-only
/// messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: i64,
    pub sender_id: Option<i64>,
    pub date: i64,
    pub text: Option<String>,
}

impl RawMessage {
    /// Convert into a storable [`Message`], dropping anything without text.
    pub fn into_message(self, chat_id: i64) -> Option<Message> {
        let text = self.text.filter(|t| !t.is_empty())?;
        Some(Message {
            id: self.id,
            chat_id,
            sender_id: self.sender_id,
            date: self.date,
            text,
        })
    }
}

/// Bounds of a single fetch.
///
/// Messages are requested in ascending id order with `id > min_id` and
/// `not_before <= date <= not_after`. `not_after` is pinned to the run's
/// start time, so anything that arrives during a run lands in the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub min_id: i64,
    pub not_before: i64,
    pub not_after: i64,
}

impl FetchWindow {
    pub fn contains(&self, id: i64, date: i64) -> bool {
        id > self.min_id && date >= self.not_before && date <= self.not_after
    }
}

/// A chat the account can read.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Wire shape of a message pushed to the replica.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReplicaRow {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    /// RFC 3339 timestamp.
    pub date: String,
    pub text: String,
}

impl From<&Message> for ReplicaRow {
    fn from(m: &Message) -> Self {
        let date = m
            .date_utc()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| m.date.to_string());
        Self {
            id: m.id,
            chat_id: m.chat_id,
            sender_id: m.sender_id,
            date,
            text: m.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_without_text_is_dropped() {
        let raw = RawMessage {
            id: 1,
            sender_id: None,
            date: 0,
            text: None,
        };
        assert!(raw.into_message(5).is_none());

        let empty = RawMessage {
            id: 2,
            sender_id: None,
            date: 0,
            text: Some(String::new()),
        };
        assert!(empty.into_message(5).is_none());
    }

    #[test]
    fn raw_with_text_keeps_fields() {
        let raw = RawMessage {
            id: 9,
            sender_id: Some(77),
            date: 1_700_000_000,
            text: Some("안녕하세요".to_string()),
        };
        let msg = raw.into_message(-100).unwrap();
        assert_eq!(msg.chat_id, -100);
        assert_eq!(msg.sender_id, Some(77));
        assert_eq!(msg.text, "안녕하세요");
    }

    #[test]
    fn window_bounds_are_exclusive_on_id_inclusive_on_date() {
        let w = FetchWindow {
            min_id: 10,
            not_before: 100,
            not_after: 200,
        };
        assert!(!w.contains(10, 150));
        assert!(w.contains(11, 100));
        assert!(w.contains(11, 200));
        assert!(!w.contains(11, 99));
        assert!(!w.contains(11, 201));
    }

    #[test]
    fn replica_row_uses_rfc3339_date() {
        let m = Message {
            id: 1,
            chat_id: 2,
            sender_id: None,
            date: 0,
            text: "hello".to_string(),
        };
        let row = ReplicaRow::from(&m);
        assert!(row.date.starts_with("1970-01-01T00:00:00"));
        assert!(row.date.contains('T'));
    }
}
