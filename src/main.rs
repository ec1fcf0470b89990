//! # Chat Indexer CLI (`chidx`)
//!
//! ```bash
//! chidx --config ./config/chidx.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chidx init` | Create the SQLite database and schema |
//! | `chidx chats` | List chats available in the source |
//! | `chidx index` | Ingest one chat (incremental, cancellable) |
//! | `chidx search "<query>"` | Trigram search, newest first |
//! | `chidx replicate` | Push new messages to the replica |
//! | `chidx stats` | Per-chat overview |
//!
//! Exit status is 0 on success, 130 when a run was cancelled by a signal,
//! and 1 on any error.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chat_indexer::chats::{self, ChatFormat};
use chat_indexer::config::{self, Config};
use chat_indexer::error::{IndexError, EXIT_CANCELLED, EXIT_FAILURE};
use chat_indexer::ingest::{self, IngestOutcome};
use chat_indexer::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use chat_indexer::replicate::{self, ReplicateOutcome};
use chat_indexer::{db, migrate, search, shutdown, stats};

#[derive(Parser)]
#[command(
    name = "chidx",
    about = "Incremental chat history indexer with Korean-friendly full-text search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chidx.toml")]
    config: PathBuf,

    /// Log at info level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema. Safe to run repeatedly.
    Init,

    /// List the chats the source can read.
    Chats {
        #[arg(long, value_enum, default_value = "json")]
        format: ChatFormat,
    },

    /// Ingest one chat, resuming after the last stored message.
    Index {
        /// Chat to index; defaults to `ingest.default_chat_id`.
        #[arg(long, allow_negative_numbers = true)]
        chat_id: Option<i64>,

        /// Retention horizon in years; defaults to `ingest.retention_years`.
        #[arg(long)]
        years: Option<u32>,

        /// Emit progress as JSON lines on stderr.
        #[arg(long, conflicts_with = "quiet")]
        json_progress: bool,

        /// Suppress progress output.
        #[arg(long, short)]
        quiet: bool,
    },

    /// Search indexed messages (at least 3 characters).
    Search {
        query: String,

        #[arg(long, allow_negative_numbers = true)]
        chat_id: Option<i64>,

        #[arg(long)]
        limit: Option<i64>,

        /// Print results as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Push messages newer than the replica's last id.
    Replicate {
        #[arg(long, conflicts_with = "quiet")]
        json_progress: bool,

        #[arg(long, short)]
        quiet: bool,
    },

    /// Show per-chat counts, cursors, and date ranges.
    Stats,
}

impl Commands {
    fn progress_mode(&self) -> Option<ProgressMode> {
        match self {
            Commands::Index {
                json_progress,
                quiet,
                ..
            }
            | Commands::Replicate {
                json_progress,
                quiet,
            } => Some(ProgressMode::from_flags(*json_progress, *quiet)),
            _ => None,
        }
    }

    /// Whether failures should be written to stdout as a JSON object.
    fn json_errors(&self) -> bool {
        matches!(
            self,
            Commands::Search { json: true, .. }
                | Commands::Chats {
                    format: ChatFormat::Json
                }
        )
    }
}

enum Status {
    Done,
    Cancelled,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mode = cli.command.progress_mode();
    let progress: Arc<dyn ProgressReporter> =
        Arc::from(mode.unwrap_or(ProgressMode::Off).reporter());

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            let err = IndexError::Configuration(format!("{:#}", err));
            if matches!(mode, Some(ProgressMode::Human | ProgressMode::Json)) {
                progress.report(ProgressEvent::error(&err, None));
            } else {
                print_error(&cli.command, &anyhow::Error::new(err));
            }
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match dispatch(&cli.command, &cfg, progress).await {
        Ok(Status::Done) => ExitCode::SUCCESS,
        Ok(Status::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Err(err) => {
            // Index and replicate already reported the failure as a progress event.
            if !matches!(mode, Some(ProgressMode::Human | ProgressMode::Json)) {
                print_error(&cli.command, &err);
            }
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn dispatch(
    command: &Commands,
    cfg: &Config,
    progress: Arc<dyn ProgressReporter>,
) -> anyhow::Result<Status> {
    match command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Chats { format } => {
            chats::run_chats(cfg, *format).await?;
        }
        Commands::Index { chat_id, years, .. } => {
            let cancel = shutdown::install_signal_handler(progress.clone());
            let outcome =
                ingest::run_index(cfg, *chat_id, *years, progress.as_ref(), &cancel).await?;
            if let IngestOutcome::Cancelled { .. } = outcome {
                return Ok(Status::Cancelled);
            }
        }
        Commands::Search {
            query,
            chat_id,
            limit,
            json,
        } => {
            search::run_search(cfg, query, *chat_id, *limit, *json).await?;
        }
        Commands::Replicate { .. } => {
            let cancel = shutdown::install_signal_handler(progress.clone());
            let outcome = replicate::run_replicate(cfg, progress.as_ref(), &cancel).await?;
            if let ReplicateOutcome::Cancelled { .. } = outcome {
                return Ok(Status::Cancelled);
            }
        }
        Commands::Stats => {
            stats::run_stats(cfg).await?;
        }
    }
    Ok(Status::Done)
}

fn print_error(command: &Commands, err: &anyhow::Error) {
    let index_err = err.downcast_ref::<IndexError>();
    let code = index_err.map(IndexError::code).unwrap_or("ERROR");

    if command.json_errors() {
        let body = serde_json::json!({ "error": format!("{:#}", err), "code": code });
        println!("{}", body);
    } else {
        eprintln!("Error [{}]: {:#}", code, err);
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chat_indexer={level},chidx={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
