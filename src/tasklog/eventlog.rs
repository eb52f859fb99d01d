//! SL-016: Append-only JSONL launch log.

use super::{cause_chain, Level, LogSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::error::Error as StdError;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One JSONL record.
#[derive(Debug, Serialize)]
struct LogEvent<'a> {
    ts: String,
    level: Level,
    message: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

/// RFC 3339 UTC timestamp.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Derive the event log path for an agent.
pub fn event_log_path(log_dir: &Path, agent: &str) -> PathBuf {
    log_dir.join(agent).join("launch.jsonl")
}

/// Sink that appends one JSON object per line to a file.
pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, level: Level, message: &str, causes: Vec<String>) {
        let event = LogEvent {
            ts: now_rfc3339(),
            level,
            message,
            causes,
        };
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("cannot serialize log event: {}", e);
                return;
            }
        };
        if let Err(e) = writeln!(self.file.lock(), "{}", json) {
            tracing::warn!("cannot append to {}: {}", self.path.display(), e);
        }
    }
}

impl LogSink for EventLog {
    fn println(&self, line: &str) {
        self.append(Level::Info, line, Vec::new());
    }

    fn error(&self, message: &str, cause: Option<&(dyn StdError + 'static)>) {
        self.append(
            Level::Error,
            message,
            cause.map(cause_chain).unwrap_or_default(),
        );
    }
}
