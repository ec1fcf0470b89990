//! `chidx chats`: list the chats the source can read.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::connector_export::ExportSource;
use crate::models::ChatInfo;
use crate::source::{connect_with_retry, MessageSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ChatFormat {
    Json,
    Table,
}

#[derive(Serialize)]
struct ChatList<'a> {
    chats: &'a [ChatInfo],
}

pub async fn run_chats(config: &Config, format: ChatFormat) -> Result<()> {
    let source = ExportSource::new(&config.source.export_path);
    let chats = list_chats(&source, config).await?;

    match format {
        ChatFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&ChatList { chats: &chats })?
            );
        }
        ChatFormat::Table => print!("{}", render_table(&chats)),
    }
    Ok(())
}

async fn list_chats(source: &dyn MessageSource, config: &Config) -> Result<Vec<ChatInfo>> {
    connect_with_retry(source, &config.ingest.retry_policy()).await?;
    let chats = source
        .list_chats()
        .await
        .map_err(crate::error::IndexError::from)?;
    Ok(chats)
}

pub fn render_table(chats: &[ChatInfo]) -> String {
    let mut out = format!("{:<20} {:<12} Name\n", "ID", "Type");
    out.push_str(&"-".repeat(60));
    out.push('\n');
    for chat in chats {
        out.push_str(&format!("{:<20} {:<12} {}\n", chat.id, chat.kind, chat.name));
    }
    out.push_str(&format!("\nTotal: {} chats\n", chats.len()));
    out
}
