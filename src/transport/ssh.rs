//! SL-031: SSH transport over libssh2.
//!
//! Blocking I/O on one TCP socket. A clone of the socket is kept so the
//! connection can be checked for remote hang-up without touching libssh2.

use super::{ExecSession, ExitReport, Transport, WorkerStream};
use crate::connection::{Credentials, Secret};
use crate::error::{RemovalError, TransportError};
use crate::hostkey::{HostKey, HostKeyVerifier, HostTarget};
use parking_lot::Mutex;
use ssh2::{Channel, ErrorCode, ExtendedData, HostKeyType, MethodType, Session};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// libssh2 error codes
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_CHANNEL_FAILURE: i32 = -21;
const LIBSSH2_ERROR_CHANNEL_REQUEST_DENIED: i32 = -22;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// libssh2 reports a refused `sftp` subsystem as a channel failure with
// this text; a failed channel open carries the same code.
const SFTP_SUBSYSTEM_REFUSED: &str = "Unable to request SFTP subsystem";

/// How long one read of the agent stream blocks before waking up.
const WORKER_READ_POLL_MS: u32 = 250;

// SFTP status codes
const SSH_FX_NO_SUCH_FILE: i32 = 2;
const SSH_FX_PERMISSION_DENIED: i32 = 3;

/// Blocking libssh2 connection.
pub struct SshTransport {
    endpoint: String,
    session: Session,
    socket: TcpStream,
    loss: Arc<Mutex<Option<String>>>,
    handshaken: AtomicBool,
    disconnected: AtomicBool,
}

impl SshTransport {
    /// Open the TCP connection. No SSH traffic happens until `establish`.
    pub fn connect(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let endpoint = format!("{}:{}", host, port);
        let tcp = connect_tcp(host, port, timeout).map_err(|source| TransportError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
        let socket = tcp.try_clone()?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);

        tracing::debug!("TCP connection to {} open", endpoint);
        Ok(Self {
            endpoint,
            session,
            socket,
            loss: Arc::new(Mutex::new(None)),
            handshaken: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        })
    }

    /// Convert an ssh2 error, remembering it when it means the socket died.
    fn note(&self, err: ssh2::Error) -> TransportError {
        if is_socket_failure(&err) {
            record_loss(&self.loss, &self.endpoint, &err);
        }
        TransportError::Ssh(err)
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<(), TransportError> {
        let user = credentials.username();
        let result = match credentials.secret() {
            Secret::KeyFile { path, passphrase } => {
                self.session
                    .userauth_pubkey_file(user, None, path, passphrase.as_deref())
            }
            Secret::Password(password) => self.session.userauth_password(user, password),
            Secret::Agent => self.session.userauth_agent(user),
        };
        result.map_err(|e| TransportError::Authentication {
            user: user.to_string(),
            message: e.message().to_string(),
        })?;

        if !self.session.authenticated() {
            return Err(TransportError::Authentication {
                user: user.to_string(),
                message: "server did not accept the credentials".to_string(),
            });
        }
        Ok(())
    }

    /// Non-destructive check for a remote hang-up on the raw socket.
    fn peek_socket(&self) -> Result<Option<String>, TransportError> {
        let mut buf = [0u8; 1];
        self.socket.set_nonblocking(true)?;
        let peeked = self.socket.peek(&mut buf);
        self.socket.set_nonblocking(false)?;
        match peeked {
            Ok(0) => Ok(Some("connection closed by remote host".to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Ok(Some(e.to_string())),
        }
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> std::io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect((host, port));
    };
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{} resolved to no addresses", host),
        )
    }))
}

/// Keep the first socket failure as the reason the transport went away.
fn record_loss(loss: &Mutex<Option<String>>, endpoint: &str, err: &ssh2::Error) {
    let mut loss = loss.lock();
    if loss.is_none() {
        tracing::warn!("transport to {} lost: {}", endpoint, err);
        *loss = Some(err.message().to_string());
    }
}

fn session_code(err: &ssh2::Error) -> Option<i32> {
    match err.code() {
        ErrorCode::Session(code) => Some(code),
        ErrorCode::SFTP(_) => None,
    }
}

fn is_socket_failure(err: &ssh2::Error) -> bool {
    matches!(
        session_code(err),
        Some(
            LIBSSH2_ERROR_SOCKET_SEND
                | LIBSSH2_ERROR_SOCKET_DISCONNECT
                | LIBSSH2_ERROR_SOCKET_RECV
        )
    )
}

/// The server refused to start the `sftp` subsystem. A channel that could
/// not be opened at all is a generic failure, not a refusal.
fn is_subsystem_refusal(err: &ssh2::Error) -> bool {
    match session_code(err) {
        Some(LIBSSH2_ERROR_CHANNEL_REQUEST_DENIED) => true,
        Some(LIBSSH2_ERROR_CHANNEL_FAILURE) => err.message() == SFTP_SUBSYSTEM_REFUSED,
        _ => false,
    }
}

/// SFTP statuses with a dedicated removal error. Anything else is `None`.
fn sftp_status_error(path: &str, err: &ssh2::Error) -> Option<RemovalError> {
    match err.code() {
        ErrorCode::SFTP(SSH_FX_NO_SUCH_FILE) => Some(RemovalError::NotFound(path.to_string())),
        ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED) => {
            Some(RemovalError::PermissionDenied(path.to_string()))
        }
        _ => None,
    }
}

/// How the wait for the agent's channel to close ended.
#[derive(Debug)]
enum WaitEnd {
    Closed,
    TimedOut,
    Lost(ssh2::Error),
    Failed(ssh2::Error),
}

fn classify_wait(waited: Result<(), ssh2::Error>) -> WaitEnd {
    match waited {
        Ok(()) => WaitEnd::Closed,
        Err(e) if session_code(&e) == Some(LIBSSH2_ERROR_TIMEOUT) => WaitEnd::TimedOut,
        Err(e) if is_socket_failure(&e) => WaitEnd::Lost(e),
        Err(e) => WaitEnd::Failed(e),
    }
}

/// An exit signal wins over the status; libssh2 reads 0 when none was sent.
fn report_from(signal: Option<String>, status: Option<i32>) -> ExitReport {
    match (signal, status) {
        (Some(signal), _) => ExitReport::signal(&signal),
        (None, Some(code)) => ExitReport::code(code),
        (None, None) => ExitReport::default(),
    }
}

/// Wire name of a host key type.
pub fn algorithm_name(kind: HostKeyType) -> &'static str {
    match kind {
        HostKeyType::Rsa => "ssh-rsa",
        HostKeyType::Dss => "ssh-dss",
        HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
        HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
        HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
        HostKeyType::Ed25519 => "ssh-ed25519",
        _ => "unknown",
    }
}

impl Transport for SshTransport {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn restrict_host_key_algorithms(&self, algorithms: &[String]) -> Result<(), TransportError> {
        self.session
            .method_pref(MethodType::HostKey, &algorithms.join(","))?;
        Ok(())
    }

    fn establish(
        &self,
        credentials: &Credentials,
        verifier: &dyn HostKeyVerifier,
        target: &HostTarget<'_>,
    ) -> Result<(), TransportError> {
        // Session is a shared handle; handshake needs it mutably.
        let mut session = self.session.clone();
        session.handshake().map_err(|e| TransportError::Handshake {
            endpoint: self.endpoint.clone(),
            message: e.message().to_string(),
        })?;
        self.handshaken.store(true, Ordering::Release);

        let key = match session.host_key() {
            Some((blob, kind)) => HostKey {
                algorithm: algorithm_name(kind).to_string(),
                key: blob.to_vec(),
            },
            None => {
                return Err(TransportError::HostKeyRejected {
                    endpoint: self.endpoint.clone(),
                    reason: "server presented no host key".to_string(),
                })
            }
        };
        verifier
            .verify(target, &key)
            .map_err(|reason| TransportError::HostKeyRejected {
                endpoint: self.endpoint.clone(),
                reason,
            })?;
        tracing::debug!("{} key for {} accepted", key.algorithm, self.endpoint);

        self.authenticate(credentials)
    }

    fn open_session(&self) -> Result<Box<dyn ExecSession>, TransportError> {
        let channel = self.session.channel_session().map_err(|e| self.note(e))?;
        Ok(Box::new(SshExecSession {
            session: self.session.clone(),
            channel,
            endpoint: self.endpoint.clone(),
            loss: Arc::clone(&self.loss),
        }))
    }

    fn exec(&self, command: &str, output: &mut dyn Write) -> Result<i32, TransportError> {
        let mut channel = self.session.channel_session().map_err(|e| self.note(e))?;
        channel
            .handle_extended_data(ExtendedData::Merge)
            .map_err(|e| self.note(e))?;
        channel.exec(command).map_err(|e| self.note(e))?;
        std::io::copy(&mut channel, output)?;
        channel.wait_close().map_err(|e| self.note(e))?;
        channel.exit_status().map_err(|e| self.note(e))
    }

    fn remove_file(&self, path: &str) -> Result<(), RemovalError> {
        let sftp = match self.session.sftp() {
            Ok(sftp) => sftp,
            Err(e) if is_subsystem_refusal(&e) => {
                return Err(RemovalError::Unsupported(e.message().to_string()))
            }
            Err(e) => return Err(RemovalError::Failed(self.note(e))),
        };
        sftp.unlink(Path::new(path)).map_err(|e| match sftp_status_error(path, &e) {
            Some(kind) => kind,
            None => RemovalError::Failed(self.note(e)),
        })
    }

    fn closed_cause(&self) -> Result<Option<TransportError>, TransportError> {
        if let Some(cause) = self.loss.lock().clone() {
            return Ok(Some(TransportError::Lost(cause)));
        }
        if self.disconnected.load(Ordering::Acquire) {
            return Ok(None);
        }
        let lost = self.peek_socket()?;
        if let Some(cause) = &lost {
            *self.loss.lock() = Some(cause.clone());
        }
        Ok(lost.map(TransportError::Lost))
    }

    fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.handshaken.load(Ordering::Acquire) {
            if let Err(e) = self.session.disconnect(None, "closed by launcher", None) {
                tracing::debug!("disconnect from {}: {}", self.endpoint, e);
            }
        }
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

/// The long-lived channel the agent runs on.
struct SshExecSession {
    session: Session,
    channel: Channel,
    endpoint: String,
    loss: Arc<Mutex<Option<String>>>,
}

impl SshExecSession {
    fn signal(&self) -> Result<Option<String>, TransportError> {
        Ok(self.channel.exit_signal()?.exit_signal)
    }
}

impl ExecSession for SshExecSession {
    fn set_window_size(&mut self, bytes: u32) -> Result<(), TransportError> {
        let current = self.channel.read_window().window_size_initial;
        if bytes > current {
            self.channel
                .adjust_receive_window(u64::from(bytes - current), true)?;
        }
        Ok(())
    }

    fn start(&mut self, command: &str) -> Result<Box<dyn WorkerStream>, TransportError> {
        self.channel.exec(command)?;
        Ok(Box::new(WorkerChannel {
            session: self.session.clone(),
            stream: self.channel.stream(0),
        }))
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> Result<ExitReport, TransportError> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self.session.set_timeout(millis);
        let waited = self
            .channel
            .wait_eof()
            .and_then(|()| self.channel.wait_close());
        self.session.set_timeout(0);

        match classify_wait(waited) {
            WaitEnd::Closed => {
                let signal = self.signal()?;
                let status = match signal {
                    Some(_) => None,
                    None => Some(self.channel.exit_status()?),
                };
                Ok(report_from(signal, status))
            }
            WaitEnd::TimedOut => Ok(report_from(self.signal()?, None)),
            WaitEnd::Lost(e) => {
                record_loss(&self.loss, &self.endpoint, &e);
                // A signal that arrived before the socket died is still
                // readable locally.
                Ok(report_from(self.signal().unwrap_or(None), None))
            }
            WaitEnd::Failed(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.channel.close()?;
        Ok(())
    }
}

/// Agent stream whose reads wake up every [`WORKER_READ_POLL_MS`] so the
/// reader can look for a stop request. A wake-up reads as `WouldBlock`.
struct WorkerChannel {
    session: Session,
    stream: ssh2::Stream,
}

impl Read for WorkerChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.session.set_timeout(WORKER_READ_POLL_MS);
        let read = self.stream.read(buf);
        self.session.set_timeout(0);
        match read {
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            other => other,
        }
    }
}

impl Write for WorkerChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
