//! SL-043: Best-effort removal of the agent jar after a session ends.
//!
//! SFTP first. Only a server without the SFTP subsystem gets the `rm`
//! fallback; every other failure is logged and left alone.

use crate::error::{CleanupError, RemovalError};
use crate::tasklog::{timestamp, LogSink, SinkWriter};
use crate::transport::Transport;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// File name of the agent bootstrap jar under the remote root.
pub const AGENT_JAR: &str = "remoting.jar";

/// `<remote_root without trailing slashes>/remoting.jar`
pub fn artifact_path(remote_root: &str) -> String {
    format!("{}/{}", remote_root.trim_end_matches('/'), AGENT_JAR)
}

/// Shell command used when SFTP is unavailable.
pub fn rm_command(path: &str) -> String {
    format!("rm '{}'", path.replace('\'', r"'\''"))
}

/// Error line prefix shared by the task and its waiter.
pub fn deletion_error_message() -> String {
    format!("{} [SSH] Error deleting file", timestamp())
}

/// How the file went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    Sftp,
    Shell,
}

pub struct CleanupTask {
    path: String,
    transport: Arc<dyn Transport>,
    log: Arc<dyn LogSink>,
}

impl CleanupTask {
    pub fn new(path: String, transport: Arc<dyn Transport>, log: Arc<dyn LogSink>) -> Self {
        Self {
            path,
            transport,
            log,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run once. Failures are logged here and also returned.
    pub fn run(&self, cancel: &CancellationToken) -> Result<Removed, CleanupError> {
        let result = self.remove(cancel);
        match &result {
            Ok(how) => tracing::debug!("removed {} via {:?}", self.path, how),
            Err(CleanupError::Cancelled) => tracing::debug!("cleanup of {} cancelled", self.path),
            Err(e) => self.log.error(&deletion_error_message(), Some(e)),
        }
        result
    }

    fn remove(&self, cancel: &CancellationToken) -> Result<Removed, CleanupError> {
        if cancel.is_cancelled() {
            return Err(CleanupError::Cancelled);
        }
        match self.transport.remove_file(&self.path) {
            Ok(()) => Ok(Removed::Sftp),
            Err(RemovalError::Unsupported(reason)) => {
                tracing::debug!("no SFTP on {}: {}", self.transport.endpoint(), reason);
                if cancel.is_cancelled() {
                    return Err(CleanupError::Cancelled);
                }
                self.remove_with_shell()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove_with_shell(&self) -> Result<Removed, CleanupError> {
        let mut output = SinkWriter::new(self.log.as_ref());
        let code = self
            .transport
            .exec(&rm_command(&self.path), &mut output)
            .map_err(CleanupError::Fallback)?;
        if code == 0 {
            Ok(Removed::Shell)
        } else {
            Err(CleanupError::ShellExit(code))
        }
    }
}
