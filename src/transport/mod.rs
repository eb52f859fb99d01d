//! SL-030: Transport abstraction — one SSH connection, many channels.
//!
//! [`Transport`] is the established connection; [`ExecSession`] is the one
//! long-lived command channel the agent runs on. Short commands (`exec`)
//! get a fresh channel each.

pub mod ssh;

#[cfg(test)]
pub(crate) mod mock;

use crate::connection::Credentials;
use crate::error::{RemovalError, TransportError};
use crate::hostkey::{HostKeyVerifier, HostTarget};
use std::io::{Read, Write};
use std::time::Duration;

pub use ssh::SshTransport;

/// Receive window for the execution session. The agent protocol is
/// multiplexed, high-throughput traffic; default windows are sized for a
/// single request/response.
pub const WINDOW_SIZE: u32 = 4 * 1024 * 1024;

/// What the remote side said about how the session's process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
}

impl ExitReport {
    pub fn code(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            exit_signal: None,
        }
    }

    pub fn signal(signal: &str) -> Self {
        Self {
            exit_code: None,
            exit_signal: Some(signal.to_string()),
        }
    }
}

/// Duplex byte stream to a running remote process.
pub trait WorkerStream: Read + Write + Send {}

impl<T: Read + Write + Send> WorkerStream for T {}

/// The single long-lived command channel of a connection.
pub trait ExecSession: Send {
    /// Grow the receive window to at least `bytes`.
    fn set_window_size(&mut self, bytes: u32) -> Result<(), TransportError>;

    /// Start `command` on this channel. A channel runs one command.
    fn start(&mut self, command: &str) -> Result<Box<dyn WorkerStream>, TransportError>;

    /// Wait up to `timeout` for an exit status or exit signal. A timeout is
    /// not an error: it yields an empty report.
    fn wait_for_exit(&mut self, timeout: Duration) -> Result<ExitReport, TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// An SSH connection to one host.
pub trait Transport: Send + Sync {
    /// `host:port`, for messages.
    fn endpoint(&self) -> String;

    /// Allow only these server host-key algorithms, in this order. Must be
    /// called before [`Transport::establish`].
    fn restrict_host_key_algorithms(&self, algorithms: &[String]) -> Result<(), TransportError>;

    /// Handshake, verify the server key, authenticate.
    fn establish(
        &self,
        credentials: &Credentials,
        verifier: &dyn HostKeyVerifier,
        target: &HostTarget<'_>,
    ) -> Result<(), TransportError>;

    fn open_session(&self) -> Result<Box<dyn ExecSession>, TransportError>;

    /// Run `command` on its own channel with stderr merged into stdout,
    /// stream the output, return the exit code.
    fn exec(&self, command: &str, output: &mut dyn Write) -> Result<i32, TransportError>;

    /// Delete a remote file over SFTP.
    fn remove_file(&self, path: &str) -> Result<(), RemovalError>;

    /// Why the connection went away, if it did. `Err` means the state could
    /// not be inspected at all.
    fn closed_cause(&self) -> Result<Option<TransportError>, TransportError>;

    /// Tear the connection down. Repeat calls are no-ops.
    fn disconnect(&self);
}
