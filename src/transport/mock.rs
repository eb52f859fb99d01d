//! Scripted transport for unit tests.

use super::{ExecSession, ExitReport, Transport, WorkerStream};
use crate::connection::Credentials;
use crate::error::{RemovalError, TransportError};
use crate::hostkey::{HostKeyVerifier, HostTarget};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// How the scripted SFTP removal answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Removal {
    #[default]
    Removed,
    Unsupported,
    NotFound,
    Denied,
    Broken,
}

#[derive(Debug, Default)]
pub struct MockState {
    // script
    pub fail_establish: bool,
    pub fail_open_session: bool,
    pub fail_window: bool,
    pub exit_report: ExitReport,
    pub fail_exit_wait: bool,
    pub lose_during_exit_wait: bool,
    pub fail_session_close: bool,
    pub loss: Option<String>,
    pub fail_loss_check: bool,
    pub removal: Removal,
    pub removal_delay: Duration,
    pub exec_exit: i32,
    pub exec_output: Vec<u8>,
    pub fail_exec: bool,

    // record
    pub restricted: Option<Vec<String>>,
    pub established: bool,
    pub window: Option<u32>,
    pub started: Vec<String>,
    pub exit_waits: Vec<Duration>,
    pub session_closed: bool,
    pub removals: Vec<String>,
    pub exec_calls: Vec<String>,
    pub disconnects: usize,
}

#[derive(Default, Clone)]
pub struct MockTransport {
    pub state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock());
        self
    }

    pub fn with<R>(&self, f: impl FnOnce(&MockState) -> R) -> R {
        f(&self.state.lock())
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl ExecSession for MockSession {
    fn set_window_size(&mut self, bytes: u32) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_window {
            return Err(TransportError::Channel("window adjust refused".into()));
        }
        state.window = Some(bytes);
        Ok(())
    }

    fn start(&mut self, command: &str) -> Result<Box<dyn WorkerStream>, TransportError> {
        self.state.lock().started.push(command.to_string());
        Ok(Box::new(std::io::Cursor::new(Vec::new())))
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> Result<ExitReport, TransportError> {
        let mut state = self.state.lock();
        state.exit_waits.push(timeout);
        if state.lose_during_exit_wait {
            state.loss = Some("Failure while reading from socket".into());
            return Err(TransportError::Lost("Failure while reading from socket".into()));
        }
        if state.fail_exit_wait {
            return Err(TransportError::Channel("exit wait failed".into()));
        }
        Ok(state.exit_report.clone())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.session_closed = true;
        if state.fail_session_close {
            return Err(TransportError::Channel("close refused".into()));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn endpoint(&self) -> String {
        "mock:22".to_string()
    }

    fn restrict_host_key_algorithms(&self, algorithms: &[String]) -> Result<(), TransportError> {
        self.state.lock().restricted = Some(algorithms.to_vec());
        Ok(())
    }

    fn establish(
        &self,
        credentials: &Credentials,
        _verifier: &dyn HostKeyVerifier,
        _target: &HostTarget<'_>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_establish {
            return Err(TransportError::Authentication {
                user: credentials.username().to_string(),
                message: "denied".into(),
            });
        }
        state.established = true;
        Ok(())
    }

    fn open_session(&self) -> Result<Box<dyn ExecSession>, TransportError> {
        if self.state.lock().fail_open_session {
            return Err(TransportError::Channel("session refused".into()));
        }
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }

    fn exec(&self, command: &str, output: &mut dyn Write) -> Result<i32, TransportError> {
        let (fail, bytes, code) = {
            let mut state = self.state.lock();
            state.exec_calls.push(command.to_string());
            (state.fail_exec, state.exec_output.clone(), state.exec_exit)
        };
        if fail {
            return Err(TransportError::Channel("exec refused".into()));
        }
        output.write_all(&bytes)?;
        Ok(code)
    }

    fn remove_file(&self, path: &str) -> Result<(), RemovalError> {
        let (removal, delay) = {
            let mut state = self.state.lock();
            state.removals.push(path.to_string());
            (state.removal, state.removal_delay)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match removal {
            Removal::Removed => Ok(()),
            Removal::Unsupported => {
                Err(RemovalError::Unsupported("subsystem request denied".into()))
            }
            Removal::NotFound => Err(RemovalError::NotFound(path.to_string())),
            Removal::Denied => Err(RemovalError::PermissionDenied(path.to_string())),
            Removal::Broken => Err(RemovalError::Failed(TransportError::Closed)),
        }
    }

    fn closed_cause(&self) -> Result<Option<TransportError>, TransportError> {
        let state = self.state.lock();
        if state.fail_loss_check {
            return Err(TransportError::Io(std::io::Error::other("loss check failed")));
        }
        Ok(state.loss.clone().map(TransportError::Lost))
    }

    fn disconnect(&self) {
        self.state.lock().disconnects += 1;
    }
}
