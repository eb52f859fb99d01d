//! SL-015: Launch log sinks.
//!
//! Every user-visible line of a launch goes through a [`LogSink`]: plain
//! lines via `println`, failures via `error` with an optional cause whose
//! `source()` chain is rendered underneath.

pub mod eventlog;

use parking_lot::Mutex;
use std::error::Error as StdError;
use std::io::Write;

pub use eventlog::EventLog;

/// Append-only line writer with a distinguished error channel.
pub trait LogSink: Send + Sync {
    /// Append one informational line.
    fn println(&self, line: &str);

    /// Append an error line, with the cause chain when one is attached.
    fn error(&self, message: &str, cause: Option<&(dyn StdError + 'static)>);
}

/// Severity of a recorded line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Error,
}

/// One recorded line plus its rendered cause chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
    pub causes: Vec<String>,
}

/// Render `err` and every `source()` beneath it, outermost first.
pub fn cause_chain(err: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut current = err.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

/// Local wall-clock stamp in `[MM/DD/YY HH:MM:SS]` form.
pub fn timestamp() -> String {
    chrono::Local::now().format("[%m/%d/%y %H:%M:%S]").to_string()
}

/// Line sink over any writer (stdout, stderr, a file).
pub struct StreamLog<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> StreamLog<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write_lines(&self, lines: &[String]) {
        let mut out = self.out.lock();
        for line in lines {
            if let Err(e) = writeln!(out, "{}", line) {
                tracing::warn!("log sink write failed: {}", e);
                return;
            }
        }
        let _ = out.flush();
    }
}

impl<W: Write + Send> LogSink for StreamLog<W> {
    fn println(&self, line: &str) {
        self.write_lines(&[line.to_string()]);
    }

    fn error(&self, message: &str, cause: Option<&(dyn StdError + 'static)>) {
        let mut lines = vec![format!("ERROR: {}", message)];
        if let Some(cause) = cause {
            lines.extend(
                cause_chain(cause)
                    .into_iter()
                    .map(|c| format!("caused by: {}", c)),
            );
        }
        self.write_lines(&lines);
    }
}

/// In-memory sink. Useful to embedders that forward lines elsewhere.
#[derive(Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded lines.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    /// All messages and causes joined with newlines.
    pub fn contents(&self) -> String {
        let mut text = String::new();
        for line in self.lines.lock().iter() {
            text.push_str(&line.message);
            text.push('\n');
            for cause in &line.causes {
                text.push_str("caused by: ");
                text.push_str(cause);
                text.push('\n');
            }
        }
        text
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }

    /// Number of lines whose message contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.message.contains(needle))
            .count()
    }

    pub fn errors(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.level == Level::Error)
            .cloned()
            .collect()
    }
}

impl LogSink for MemoryLog {
    fn println(&self, line: &str) {
        self.lines.lock().push(LogLine {
            level: Level::Info,
            message: line.to_string(),
            causes: Vec::new(),
        });
    }

    fn error(&self, message: &str, cause: Option<&(dyn StdError + 'static)>) {
        self.lines.lock().push(LogLine {
            level: Level::Error,
            message: message.to_string(),
            causes: cause.map(cause_chain).unwrap_or_default(),
        });
    }
}

/// `io::Write` adapter that forwards complete lines to a sink.
///
/// A trailing partial line is emitted on flush or drop.
pub struct SinkWriter<'a> {
    sink: &'a dyn LogSink,
    pending: Vec<u8>,
}

impl<'a> SinkWriter<'a> {
    pub fn new(sink: &'a dyn LogSink) -> Self {
        Self {
            sink,
            pending: Vec::new(),
        }
    }

    fn emit_complete_lines(&mut self) {
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            self.sink.println(text.trim_end_matches('\r'));
        }
    }
}

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.emit_complete_lines();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.pending.is_empty() {
            let text = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.sink.println(&text);
        }
        Ok(())
    }
}

impl Drop for SinkWriter<'_> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
