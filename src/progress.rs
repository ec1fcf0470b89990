//! Indexing and replication progress reporting.
//!
//! Pipelines emit a sequence of [`ProgressEvent`]s to a [`ProgressReporter`]
//! so users (or a GUI wrapping the CLI) can see what is happening. Progress
//! goes to **stderr** so stdout remains parseable for scripts.
//!
//! JSON mode writes one object per line, tagged by `type`:
//!
//! ```text
//! {"type":"progress","message":"Collected 2,000 messages","current":2000,"total":null,"elapsed_sec":3,"rate":612.4}
//! ```

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::IndexError;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Start {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },
    Info {
        message: String,
    },
    Progress {
        message: String,
        current: u64,
        /// Unknown while ingesting; the source does not expose a count.
        total: Option<u64>,
        elapsed_sec: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        percentage: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rate: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_sec: Option<u64>,
    },
    Cancelling {
        message: String,
    },
    RollingBack {
        message: String,
        pending: u64,
    },
    Cancelled {
        message: String,
        collected: u64,
        rolled_back: u64,
    },
    Complete {
        message: String,
        total: u64,
        elapsed_sec: u64,
    },
    Error {
        message: String,
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        wait_seconds: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rolled_back: Option<u64>,
    },
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    /// `error` event for `err`, with the number of rows a rollback removed.
    pub fn error(err: &IndexError, rolled_back: Option<u64>) -> Self {
        Self::Error {
            message: err.to_string(),
            code: err.code().to_string(),
            wait_seconds: err.wait_seconds(),
            rolled_back,
        }
    }

    /// The `type` tag as it appears in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Info { .. } => "info",
            Self::Progress { .. } => "progress",
            Self::Cancelling { .. } => "cancelling",
            Self::RollingBack { .. } => "rolling_back",
            Self::Cancelled { .. } => "cancelled",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Start { message, .. }
            | Self::Info { message }
            | Self::Progress { message, .. }
            | Self::Cancelling { message }
            | Self::RollingBack { message, .. }
            | Self::Cancelled { message, .. }
            | Self::Complete { message, .. }
            | Self::Error { message, .. } => message,
        }
    }
}

/// Receives progress events. Implementations must not block for long:
/// they are called inline from the pipeline loop.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Wall-clock for one run; turns counts into `progress` events.
#[derive(Clone, Copy, Debug)]
pub struct RunClock {
    started: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_sec(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Build a `progress` event with rate, and with percentage and ETA when
    /// `total` is known.
    pub fn progress(&self, message: String, current: u64, total: Option<u64>) -> ProgressEvent {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            Some((current as f64 / elapsed * 10.0).round() / 10.0)
        } else {
            None
        };
        let percentage = total.map(|t| {
            if t == 0 {
                100
            } else {
                ((current.min(t) * 100) / t) as u32
            }
        });
        let eta_sec = match (total, rate) {
            (Some(t), Some(r)) if r > 0.0 => Some((t.saturating_sub(current) as f64 / r) as u64),
            _ => None,
        };

        ProgressEvent::Progress {
            message,
            current,
            total,
            elapsed_sec: elapsed as u64,
            percentage,
            rate,
            eta_sec,
        }
    }
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Progress { message, .. } => format!("  {}\n", message),
            ProgressEvent::Error { message, code, .. } => format!("error [{}]: {}\n", code, message),
            other => format!("{}\n", other.message()),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory, for embedding the pipelines in another
/// program (or asserting on them).
#[derive(Default)]
pub struct MemoryProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ProgressEvent::kind).collect()
    }
}

impl ProgressReporter for MemoryProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Resolve CLI flags; without either flag, human progress when stderr
    /// is a TTY, otherwise off.
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            ProgressMode::Json
        } else if quiet {
            ProgressMode::Off
        } else if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
