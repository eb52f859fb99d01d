//! SL-001: Error taxonomy.
//!
//! Establishment and exec failures propagate to the caller. Outcome and
//! cleanup failures never leave `close()`; they only show up as log lines.

use std::io;
use thiserror::Error;

/// Crate-level result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of the SSH transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("SSH handshake with {endpoint} failed: {message}")]
    Handshake { endpoint: String, message: String },

    #[error("host key for {endpoint} rejected: {reason}")]
    HostKeyRejected { endpoint: String, reason: String },

    #[error("authentication as '{user}' failed: {message}")]
    Authentication { user: String, message: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("transport is closed")]
    Closed,

    #[error("connection lost: {0}")]
    Lost(String),

    #[error(transparent)]
    Ssh(#[from] ssh2::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Why an SFTP removal attempt did not delete the file.
///
/// Only [`RemovalError::Unsupported`] triggers the shell fallback.
#[derive(Debug, Error)]
pub enum RemovalError {
    #[error("SFTP subsystem unavailable: {0}")]
    Unsupported(String),

    #[error("no such file: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("SFTP removal failed: {0}")]
    Failed(#[source] TransportError),
}

/// Outcome of a failed remote cleanup.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    Removal(#[from] RemovalError),

    #[error("shell fallback failed: {0}")]
    Fallback(#[source] TransportError),

    #[error("shell fallback exited with code {0}")]
    ShellExit(i32),

    #[error("cleanup cancelled before it started")]
    Cancelled,
}

/// Top-level error returned by connection operations and the CLI.
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection to {endpoint} could not be established: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("remote command failed: {0}")]
    Exec(#[source] TransportError),

    #[error("connection is not open")]
    NotOpen,

    #[error("agent process already launched on this session")]
    WorkerAlreadyLaunched,

    #[error("close failed: {0}")]
    Close(#[source] TransportError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
