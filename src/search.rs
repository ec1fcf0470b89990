//! `chidx search`: trigram search with highlighted snippets and deep links.
//!
//! The query is validated before the database is opened, so a too-short
//! query fails with `QUERY_TOO_SHORT` even when nothing has been indexed.
//! Results come back newest first.

use anyhow::Result;
use serde::Serialize;
use std::time::Instant;

use crate::config::Config;
use crate::error::IndexError;
use crate::models::Message;
use crate::store::{fts_phrase, MessageStore};

const HIGHLIGHT: &str = "\x1b[1;33m";
const DIM: &str = "\x1b[2m";
const LINK: &str = "\x1b[4;36m";
const RESET: &str = "\x1b[0m";

/// Characters of context kept before the first match.
const CONTEXT_BEFORE: usize = 50;
/// Total snippet budget in characters.
const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Serialize)]
pub struct SearchOutput {
    pub count: usize,
    pub elapsed_ms: f64,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub chat_id: i64,
    /// RFC 3339, UTC.
    pub date: String,
    pub text: String,
    pub link: String,
}

impl From<&Message> for SearchHit {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            chat_id: m.chat_id,
            date: m.date_utc().map(|d| d.to_rfc3339()).unwrap_or_default(),
            text: m.text.clone(),
            link: build_link(m.chat_id, m.id),
        }
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    chat_id: Option<i64>,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    fts_phrase(query)?;

    if !config.db.path.exists() {
        return Err(IndexError::DatabaseNotFound(config.db.path.clone()).into());
    }

    let store = MessageStore::open(&config.db.path).await?;
    let limit = limit.unwrap_or(config.search.default_limit);

    let started = Instant::now();
    let results = store.search(query, chat_id, limit).await?;
    let elapsed = started.elapsed();
    store.close().await;

    if json {
        let output = SearchOutput {
            count: results.len(),
            elapsed_ms: (elapsed.as_secs_f64() * 100_000.0).round() / 100.0,
            results: results.iter().map(SearchHit::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let keyword = query.trim();
    if results.is_empty() {
        println!("\nNo results found for '{}'", keyword);
        return Ok(());
    }

    println!(
        "\nFound {} result(s) in {:.3}s",
        results.len(),
        elapsed.as_secs_f64()
    );
    println!("{}", "=".repeat(60));
    for (i, m) in results.iter().enumerate() {
        let date = m
            .date_utc()
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!();
        println!("{}[{}] {}{}", DIM, i + 1, date, RESET);
        println!("{}", highlight(&m.text, keyword).replace('\n', " "));
        println!("{}{}{}", LINK, build_link(m.chat_id, m.id), RESET);
    }
    println!("{}", "=".repeat(60));

    Ok(())
}

/// Deep link that opens the message in the desktop/mobile client.
///
/// Channel and supergroup ids carry a `-100` prefix that the link format
/// omits.
pub fn build_link(chat_id: i64, message_id: i64) -> String {
    let id = chat_id.to_string();
    let channel = id.strip_prefix("-100").unwrap_or(&id);
    format!("tg://privatepost?channel={}&post={}", channel, message_id)
}

/// Cut a snippet around the first case-insensitive match of `keyword` and
/// wrap every match inside it in ANSI bold yellow.
pub fn highlight(text: &str, keyword: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let needle: Vec<char> = keyword.chars().collect();

    let Some(first) = find_ci(&chars, &needle, 0) else {
        if chars.len() > SNIPPET_CHARS {
            let cut: String = chars[..SNIPPET_CHARS].iter().collect();
            return format!("{}...", cut);
        }
        return text.to_string();
    };

    let context_after = SNIPPET_CHARS.saturating_sub(CONTEXT_BEFORE + needle.len());
    let start = first.saturating_sub(CONTEXT_BEFORE);
    let end = (first + needle.len() + context_after).min(chars.len());
    let snippet = &chars[start..end];

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    let mut pos = 0;
    while let Some(hit) = find_ci(snippet, &needle, pos) {
        out.extend(&snippet[pos..hit]);
        out.push_str(HIGHLIGHT);
        out.extend(&snippet[hit..hit + needle.len()]);
        out.push_str(RESET);
        pos = hit + needle.len();
    }
    out.extend(&snippet[pos..]);
    if end < chars.len() {
        out.push_str("...");
    }
    out
}

fn find_ci(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| a.to_lowercase().eq(b.to_lowercase()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_strips_channel_prefix() {
        assert_eq!(
            build_link(-1001234567890, 42),
            "tg://privatepost?channel=1234567890&post=42"
        );
        assert_eq!(build_link(555, 1), "tg://privatepost?channel=555&post=1");
    }

    #[test]
    fn highlights_every_match_case_insensitively() {
        let out = highlight("Deploy then deploy again", "deploy");
        assert_eq!(
            out,
            format!(
                "{h}Deploy{r} then {h}deploy{r} again",
                h = HIGHLIGHT,
                r = RESET
            )
        );
    }

    #[test]
    fn snippet_keeps_context_before_match() {
        let text = format!("{}회의록 정리{}", "가".repeat(120), "나".repeat(300));
        let out = highlight(&text, "회의록");
        assert!(out.starts_with("..."));
        assert!(out.ends_with("..."));
        let plain = out.replace(HIGHLIGHT, "").replace(RESET, "");
        let body = plain.trim_start_matches("...").trim_end_matches("...");
        assert_eq!(body.chars().count(), SNIPPET_CHARS);
        assert!(body.starts_with(&"가".repeat(CONTEXT_BEFORE)));
    }

    #[test]
    fn no_match_truncates() {
        let text = "x".repeat(250);
        let out = highlight(&text, "abc");
        assert_eq!(out.chars().count(), SNIPPET_CHARS + 3);
        assert_eq!(highlight("short", "abc"), "short");
    }

    #[test]
    fn json_hit_shape() {
        let m = Message {
            id: 9,
            chat_id: -1001,
            sender_id: None,
            date: 0,
            text: "hello".to_string(),
        };
        let v = serde_json::to_value(SearchHit::from(&m)).unwrap();
        assert_eq!(v["id"], 9);
        assert_eq!(v["date"], "1970-01-01T00:00:00+00:00");
        assert_eq!(v["link"], "tg://privatepost?channel=1&post=9");
    }
}
