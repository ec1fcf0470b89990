//! Export-file connector.
//!
//! Reads the JSON produced by a chat client's "export chat history"
//! feature and serves it through the [`MessageSource`] interface. Two
//! layouts are accepted:
//!
//! - a single-chat export: `{"id", "name", "type", "messages": [...]}`
//! - a full account export: `{"chats": {"list": [{...}, ...]}}`
//!
//! Exports store channel and supergroup ids without the `-100` prefix the
//! API uses; they are normalized here so stored chat ids match the ones
//! deep links and the live API expect.
//!
//! The export is loaded once by [`authenticate`](MessageSource::authenticate)
//! and kept in memory.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::models::{ChatInfo, FetchWindow, RawMessage};
use crate::source::{MessageSource, MessageStream};

const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

#[derive(Deserialize)]
struct ExportRoot {
    #[serde(default)]
    chats: Option<ExportChatList>,
    #[serde(flatten)]
    single: Option<ExportChat>,
}

#[derive(Deserialize)]
struct ExportChatList {
    #[serde(default)]
    list: Vec<ExportChat>,
}

#[derive(Deserialize)]
struct ExportChat {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

#[derive(Deserialize)]
struct ExportMessage {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    date_unixtime: Option<String>,
    #[serde(default)]
    from_id: Option<String>,
    #[serde(default)]
    text: Option<ExportText>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExportText {
    Plain(String),
    Entities(Vec<TextPart>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextPart {
    Plain(String),
    Entity { text: String },
}

impl ExportText {
    fn flatten(self) -> String {
        match self {
            ExportText::Plain(s) => s,
            ExportText::Entities(parts) => parts
                .into_iter()
                .map(|p| match p {
                    TextPart::Plain(s) => s,
                    TextPart::Entity { text } => text,
                })
                .collect(),
        }
    }
}

/// A chat with its messages sorted by id.
#[derive(Debug, Clone)]
struct LoadedChat {
    info: ChatInfo,
    messages: Vec<RawMessage>,
}

pub struct ExportSource {
    path: PathBuf,
    chats: OnceLock<Vec<LoadedChat>>,
}

impl ExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chats: OnceLock::new(),
        }
    }

    fn loaded(&self) -> Result<&[LoadedChat], SourceError> {
        self.chats
            .get()
            .map(Vec::as_slice)
            .ok_or_else(|| SourceError::Protocol("export source used before authenticate".into()))
    }

    fn window_messages(&self, chat_id: i64, window: FetchWindow) -> Result<Vec<RawMessage>, SourceError> {
        let chats = self.loaded()?;
        let chat = chats
            .iter()
            .find(|c| c.info.id == chat_id)
            .ok_or_else(|| SourceError::Protocol(format!("chat {} not found in export", chat_id)))?;

        Ok(chat
            .messages
            .iter()
            .filter(|m| window.contains(m.id, m.date))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageSource for ExportSource {
    fn name(&self) -> &str {
        "export"
    }

    async fn authenticate(&self) -> Result<(), SourceError> {
        if self.chats.get().is_some() {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::Protocol(format!("export file not found: {}", self.path.display()))
            } else {
                SourceError::Protocol(format!("cannot read export {}: {}", self.path.display(), e))
            }
        })?;

        let chats = parse_export(&content)?;
        debug!(path = %self.path.display(), chats = chats.len(), "export loaded");
        let _ = self.chats.set(chats);
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatInfo>, SourceError> {
        Ok(self.loaded()?.iter().map(|c| c.info.clone()).collect())
    }

    fn iterate(&self, chat_id: i64, window: FetchWindow) -> MessageStream<'_> {
        match self.window_messages(chat_id, window) {
            Ok(messages) => Box::pin(stream::iter(messages.into_iter().map(Ok))),
            Err(e) => Box::pin(stream::iter(std::iter::once(Err(e)))),
        }
    }
}

fn parse_export(content: &str) -> Result<Vec<LoadedChat>, SourceError> {
    let root: ExportRoot = serde_json::from_str(content)
        .map_err(|e| SourceError::Protocol(format!("invalid export JSON: {}", e)))?;

    let raw_chats = match (root.chats, root.single) {
        (Some(list), _) => list.list,
        (None, Some(single)) => vec![single],
        (None, None) => {
            return Err(SourceError::Protocol(
                "export contains neither a chat nor a chat list".into(),
            ))
        }
    };

    Ok(raw_chats.into_iter().map(load_chat).collect())
}

fn load_chat(chat: ExportChat) -> LoadedChat {
    let id = normalize_chat_id(chat.id, &chat.kind);
    let mut messages: Vec<RawMessage> = chat
        .messages
        .into_iter()
        .filter_map(|m| {
            let Some(date) = message_date(&m) else {
                warn!(chat_id = id, message_id = m.id, "message without a usable date skipped");
                return None;
            };
            let text = if m.kind == "message" {
                m.text.map(ExportText::flatten)
            } else {
                None
            };
            Some(RawMessage {
                id: m.id,
                sender_id: m.from_id.as_deref().and_then(parse_peer_id),
                date,
                text,
            })
        })
        .collect();
    messages.sort_by_key(|m| m.id);

    LoadedChat {
        info: ChatInfo {
            id,
            name: chat
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "(Unknown)".to_string()),
            kind: chat_kind(&chat.kind).to_string(),
        },
        messages,
    }
}

fn message_date(m: &ExportMessage) -> Option<i64> {
    if let Some(ts) = m.date_unixtime.as_deref().and_then(|s| s.parse::<i64>().ok()) {
        return Some(ts);
    }
    let date = m.date.as_deref()?;
    NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// `"user123"` / `"channel456"` → numeric id.
fn parse_peer_id(from_id: &str) -> Option<i64> {
    from_id
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

fn chat_kind(export_type: &str) -> &'static str {
    match export_type {
        "personal_chat" | "bot_chat" | "saved_messages" => "user",
        "private_group" => "group",
        "private_supergroup" | "public_supergroup" => "supergroup",
        "private_channel" | "public_channel" => "channel",
        _ => "unknown",
    }
}

fn normalize_chat_id(id: i64, export_type: &str) -> i64 {
    if id < 0 {
        return id;
    }
    match chat_kind(export_type) {
        "supergroup" | "channel" => -(CHANNEL_ID_OFFSET + id),
        "group" => -id,
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{connect_with_retry, RetryPolicy};
    use futures::StreamExt;
    use tempfile::TempDir;

    const SINGLE: &str = r#"{
        "name": "개발팀",
        "type": "private_supergroup",
        "id": 1234567890,
        "messages": [
            {"id": 3, "type": "message", "date": "2024-01-03T00:00:00", "date_unixtime": "1704240000",
             "from": "Kim", "from_id": "user42", "text": "세 번째 메시지"},
            {"id": 1, "type": "message", "date": "2024-01-01T00:00:00", "date_unixtime": "1704067200",
             "from_id": "user42", "text": ["링크: ", {"type": "link", "text": "https://example.com"}]},
            {"id": 2, "type": "service", "date": "2024-01-02T00:00:00", "date_unixtime": "1704153600",
             "actor_id": "user42", "action": "pin_message", "text": ""},
            {"id": 4, "type": "message", "date": "2024-01-04T00:00:00", "date_unixtime": "1704326400",
             "from_id": "channel7", "photo": "photos/1.jpg", "text": ""}
        ]
    }"#;

    const FULL: &str = r#"{
        "about": "export",
        "chats": {"list": [
            {"name": "Alice", "type": "personal_chat", "id": 555, "messages": [
                {"id": 10, "type": "message", "date": "2023-05-01T10:00:00", "from_id": "user555", "text": "hello there"}
            ]},
            {"name": "", "type": "private_group", "id": 777, "messages": []}
        ]}
    }"#;

    fn wide_window() -> FetchWindow {
        FetchWindow {
            min_id: 0,
            not_before: 0,
            not_after: i64::MAX,
        }
    }

    #[test]
    fn parses_single_chat_export() {
        let chats = parse_export(SINGLE).unwrap();
        assert_eq!(chats.len(), 1);
        let chat = &chats[0];
        assert_eq!(chat.info.id, -1001234567890);
        assert_eq!(chat.info.kind, "supergroup");

        let ids: Vec<i64> = chat.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(
            chat.messages[0].text.as_deref(),
            Some("링크: https://example.com")
        );
        assert_eq!(chat.messages[0].sender_id, Some(42));
        assert_eq!(chat.messages[1].text, None);
        assert_eq!(chat.messages[3].text.as_deref(), Some(""));
        assert_eq!(chat.messages[3].sender_id, Some(7));
    }

    #[test]
    fn parses_full_export_and_falls_back_to_iso_date() {
        let chats = parse_export(FULL).unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].info.id, 555);
        assert_eq!(chats[0].info.kind, "user");
        assert_eq!(chats[0].messages[0].date, 1682935200);
        assert_eq!(chats[1].info.id, -777);
        assert_eq!(chats[1].info.name, "(Unknown)");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_export("not json").is_err());
        assert!(parse_export("{}").is_err());
    }

    #[tokio::test]
    async fn iterates_inside_window_in_id_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, SINGLE).unwrap();

        let source = ExportSource::new(&path);
        source.authenticate().await.unwrap();

        let window = FetchWindow {
            min_id: 1,
            not_before: 0,
            not_after: 1704240000,
        };
        let got: Vec<i64> = source
            .iterate(-1001234567890, window)
            .map(|r| r.unwrap().id)
            .collect()
            .await;
        assert_eq!(got, vec![2, 3]);

        let chats = source.list_chats().await.unwrap();
        assert_eq!(chats[0].name, "개발팀");
    }

    #[tokio::test]
    async fn unknown_chat_yields_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, FULL).unwrap();

        let source = ExportSource::new(&path);
        source.authenticate().await.unwrap();
        let items: Vec<_> = source.iterate(999, wide_window()).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(SourceError::Protocol(_))));
    }

    #[tokio::test]
    async fn missing_file_is_not_retryable() {
        let source = ExportSource::new("/definitely/not/here/result.json");
        let err = source.authenticate().await.unwrap_err();
        assert!(matches!(err, SourceError::Protocol(_)));
    }

    #[tokio::test]
    async fn unreadable_path_fails_once_without_retry() {
        let dir = TempDir::new().unwrap();
        let source = ExportSource::new(dir.path());

        let err = source.authenticate().await.unwrap_err();
        assert!(matches!(err, SourceError::Protocol(_)));

        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: std::time::Duration::from_secs(30),
            backoff_factor: 2,
        };
        let started = std::time::Instant::now();
        let err = connect_with_retry(&source, &policy).await.unwrap_err();
        assert_eq!(err.code(), "SOURCE_ERROR");
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
