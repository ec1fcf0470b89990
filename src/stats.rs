//! Database overview for `chidx stats`.
//!
//! Shows the database size, the total number of indexed messages, and a
//! per-chat breakdown with each chat's resumption cursor and date range.

use anyhow::Result;
use chrono::DateTime;

use crate::config::Config;
use crate::progress::format_number;
use crate::store::{ChatStats, MessageStore};

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = MessageStore::open(&config.db.path).await?;
    let total = store.count().await?;
    let chats = store.chat_stats().await?;
    store.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("chidx database stats");
    println!("====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Messages:    {}", format_number(total));
    println!("  Chats:       {}", chats.len());

    if !chats.is_empty() {
        println!();
        print!("{}", render_chat_table(&chats));
    }
    println!();
    Ok(())
}

fn render_chat_table(chats: &[ChatStats]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "  {:<20} {:>10} {:>12}   {:<10}   {:<10}\n",
        "CHAT", "MESSAGES", "CURSOR", "FIRST", "LAST"
    ));
    out.push_str(&format!("  {}\n", "-".repeat(72)));
    for c in chats {
        out.push_str(&format!(
            "  {:<20} {:>10} {:>12}   {:<10}   {:<10}\n",
            c.chat_id,
            format_number(c.messages.max(0) as u64),
            c.cursor,
            format_day(c.first_date),
            format_day(c.last_date)
        ));
    }
    out
}

fn format_day(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
