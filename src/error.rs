//! Error taxonomy for indexing, search, and replication.
//!
//! Every failure that leaves the core is an [`IndexError`] carrying a stable
//! machine-readable [`code`](IndexError::code), which the progress layer and
//! the CLI forward unchanged.
//!
//! | Variant | Code | Retryable | Raised by |
//! |---------|------|-----------|-----------|
//! | `Configuration` | `CONFIG_ERROR` | No | config / CLI, before any I/O |
//! | `Connection` | `NETWORK_ERROR` | Yes (internally) | source handshake |
//! | `PrefetchDelay` | `TAKEOUT_DELAY` | No | source, before fetching |
//! | `PermissionDenied` | `ADMIN_REQUIRED` | No | source |
//! | `Source` | `SOURCE_ERROR` | No | source (malformed data, unknown chat) |
//! | `RateLimited` | `FLOOD_WAIT` | Caller decides | source |
//! | `Storage` | `SQLITE_ERROR` | No | local store |
//! | `Sink` | `SYNC_ERROR` | No | replica sink |
//! | `Validation` | `QUERY_TOO_SHORT` | No | search |
//! | `DatabaseNotFound` | `DB_NOT_FOUND` | No | search, before indexing ever ran |

use std::path::PathBuf;
use thiserror::Error;

/// Process exit status for a run that was cancelled by the user.
pub const EXIT_CANCELLED: u8 = 130;

/// Process exit status for configuration or fatal errors.
pub const EXIT_FAILURE: u8 = 1;

/// Errors reported by a [`MessageSource`](crate::source::MessageSource).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Transient network failure. Retried during the handshake.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The source requires a wait before an export session may start.
    #[error("source requires waiting {wait_seconds}s before fetching")]
    PrefetchDelay { wait_seconds: u64 },

    /// The account lacks permission to read the chat.
    #[error("permission denied for chat {chat_id}")]
    PermissionDenied { chat_id: i64 },

    /// The source asked us to back off.
    #[error("rate limited, retry after {wait_seconds}s")]
    RateLimited { wait_seconds: u64 },

    /// Anything else the source could not serve (bad data, unknown chat).
    #[error("{0}")]
    Protocol(String),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    #[error("source requires waiting {wait_seconds} seconds before export")]
    PrefetchDelay { wait_seconds: u64 },

    #[error("admin permission required for chat {chat_id}")]
    PermissionDenied { chat_id: i64 },

    #[error("source error: {0}")]
    Source(String),

    #[error("rate limited, retry after {wait_seconds} seconds")]
    RateLimited { wait_seconds: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database not found: {}; run `chidx index` first", .0.display())]
    DatabaseNotFound(PathBuf),
}

impl IndexError {
    /// Stable code used in `error` progress events and JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIG_ERROR",
            Self::Connection { .. } => "NETWORK_ERROR",
            Self::PrefetchDelay { .. } => "TAKEOUT_DELAY",
            Self::PermissionDenied { .. } => "ADMIN_REQUIRED",
            Self::Source(_) => "SOURCE_ERROR",
            Self::RateLimited { .. } => "FLOOD_WAIT",
            Self::Storage(_) => "SQLITE_ERROR",
            Self::Sink(_) => "SYNC_ERROR",
            Self::Validation(_) => "QUERY_TOO_SHORT",
            Self::DatabaseNotFound(_) => "DB_NOT_FOUND",
        }
    }

    /// Wait duration imposed by the source, if any.
    pub fn wait_seconds(&self) -> Option<u64> {
        match self {
            Self::PrefetchDelay { wait_seconds } | Self::RateLimited { wait_seconds } => {
                Some(*wait_seconds)
            }
            _ => None,
        }
    }

    /// Only transient connection failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<SourceError> for IndexError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Connection(message) => Self::Connection {
                attempts: 1,
                message,
            },
            SourceError::PrefetchDelay { wait_seconds } => Self::PrefetchDelay { wait_seconds },
            SourceError::PermissionDenied { chat_id } => Self::PermissionDenied { chat_id },
            SourceError::RateLimited { wait_seconds } => Self::RateLimited { wait_seconds },
            SourceError::Protocol(msg) => Self::Source(msg),
        }
    }
}
