//! SL-044: Session connection — the lifecycle of one agent connection.
//!
//! open: restrict host-key algorithms → handshake/auth → register →
//! execution session → 4 MiB window.
//! close: transport-loss check → exit outcome → remote cleanup →
//! unregister. Only the loss check can make `close` fail.

use super::cleanup::{artifact_path, deletion_error_message, CleanupTask};
use super::params::ConnectionParameters;
use super::pool::WorkerPool;
use super::registry::{ConnectionRegistry, TransportId};
use crate::error::{Error, Result, TransportError};
use crate::hostkey::HostTarget;
use crate::tasklog::LogSink;
use crate::transport::{ExecSession, ExitReport, Transport, WorkerStream, WINDOW_SIZE};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// How long close() waits for the agent's exit status or signal.
pub const EXIT_WAIT: Duration = Duration::from_millis(3000);

const NO_ALGORITHMS_WARNING: &str =
    "Warning: no key algorithms provided; host key algorithm restriction disabled";
const TRANSPORT_LOST: &str = "Socket connection to SSH server was lost";
const CLOSE_ERROR: &str = "Error while closing connection";

/// How the agent process ended, as far as the session can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signalled(String),
    /// No report, and the transport died first.
    LostBeforeReport,
    /// No report, transport still up. The process may still be running.
    NoReport,
}

impl ExitOutcome {
    pub fn from_report(report: &ExitReport, connection_lost: bool) -> Self {
        if let Some(code) = report.exit_code {
            ExitOutcome::Exited(code)
        } else if let Some(signal) = &report.exit_signal {
            ExitOutcome::Signalled(signal.clone())
        } else if connection_lost {
            ExitOutcome::LostBeforeReport
        } else {
            ExitOutcome::NoReport
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => {
                write!(f, "Agent process has terminated. Exit code={}", code)
            }
            ExitOutcome::Signalled(signal) => {
                write!(f, "Agent process has terminated. Exit signal={}", signal)
            }
            ExitOutcome::LostBeforeReport => write!(
                f,
                "Agent process has not reported exit code before the socket was lost"
            ),
            ExitOutcome::NoReport => write!(
                f,
                "Agent process has not reported exit code. Is it still running?"
            ),
        }
    }
}

/// Lifecycle state. The execution session exists exactly while `Open`.
enum SessionState {
    Open {
        session: Box<dyn ExecSession>,
        worker_started: bool,
    },
    Closed,
}

/// One SSH connection plus its execution session.
///
/// Not internally synchronised; one caller drives exec/close.
pub struct SessionConnection {
    params: ConnectionParameters,
    transport: Arc<dyn Transport>,
    registry: Arc<ConnectionRegistry>,
    pool: WorkerPool,
    id: TransportId,
    state: SessionState,
}

impl SessionConnection {
    /// Bring a freshly connected transport up to an open session.
    ///
    /// All or nothing: on error the transport is disconnected and nothing
    /// stays registered.
    pub fn open(
        transport: Arc<dyn Transport>,
        params: ConnectionParameters,
        registry: Arc<ConnectionRegistry>,
        pool: WorkerPool,
    ) -> Result<Self> {
        let log = Arc::clone(params.log());
        let endpoint = transport.endpoint();

        {
            let owner = params.owner();
            let target = HostTarget {
                host: params.host(),
                port: params.port(),
                node: owner.as_deref(),
            };
            match params.verifier().preferred_key_algorithms(&target) {
                Some(algorithms) if !algorithms.is_empty() => {
                    tracing::debug!("{}: host key algorithms {:?}", endpoint, algorithms);
                    transport
                        .restrict_host_key_algorithms(&algorithms)
                        .map_err(|e| abort(transport.as_ref(), &endpoint, e))?;
                }
                _ => log.println(NO_ALGORITHMS_WARNING),
            }
            transport
                .establish(params.credentials(), params.verifier().as_ref(), &target)
                .map_err(|e| abort(transport.as_ref(), &endpoint, e))?;
        }

        let id = registry.register(Arc::clone(&transport));
        let session = match open_execution_session(transport.as_ref(), log.as_ref()) {
            Ok(session) => session,
            Err(e) => {
                registry.unregister(id);
                return Err(abort(transport.as_ref(), &endpoint, e));
            }
        };

        tracing::info!("session to {} open ({})", endpoint, id);
        Ok(Self {
            params,
            transport,
            registry,
            pool,
            id,
            state: SessionState::Open {
                session,
                worker_started: false,
            },
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open { .. })
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    /// Run `command` to completion on its own channel, streaming stdout and
    /// stderr into `output`. Returns the remote exit code.
    pub fn exec(&mut self, command: &str, output: &mut dyn Write) -> Result<i32> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        tracing::debug!("{}: exec {}", self.id, command);
        self.transport.exec(command, output).map_err(Error::Exec)
    }

    /// Start the agent on the execution session and hand back its stream.
    /// This is the process whose outcome `close` reports.
    pub fn launch_worker(&mut self, command: &str) -> Result<Box<dyn WorkerStream>> {
        match &mut self.state {
            SessionState::Closed => Err(Error::NotOpen),
            SessionState::Open {
                worker_started: true,
                ..
            } => Err(Error::WorkerAlreadyLaunched),
            SessionState::Open {
                session,
                worker_started,
            } => {
                let stream = session.start(command).map_err(Error::Exec)?;
                *worker_started = true;
                tracing::info!("{}: agent started", self.id);
                Ok(stream)
            }
        }
    }

    /// Close the connection. Repeat calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let log = Arc::clone(self.params.log());

        let mut connection_lost = match self.report_transport_loss(log.as_ref()) {
            Ok(lost) => lost,
            Err(e) => {
                log.error("Cannot determine the state of the SSH connection", Some(&e));
                self.state = SessionState::Closed;
                self.release();
                return Err(Error::Close(e));
            }
        };

        if let SessionState::Open { mut session, .. } =
            std::mem::replace(&mut self.state, SessionState::Closed)
        {
            // Give the agent a moment to report how it died (crash, OOM,
            // exit code) before we stop listening.
            let report = match session.wait_for_exit(EXIT_WAIT) {
                Ok(report) => Some(report),
                // A dead socket fails the wait itself.
                Err(e) if connection_lost => {
                    tracing::debug!("{}: exit wait on lost transport: {}", self.id, e);
                    Some(ExitReport::default())
                }
                Err(e) if self.loss_revealed(log.as_ref()) => {
                    tracing::debug!("{}: exit wait hit the lost transport: {}", self.id, e);
                    connection_lost = true;
                    Some(ExitReport::default())
                }
                Err(e) => {
                    log.error(CLOSE_ERROR, Some(&e));
                    None
                }
            };
            if let Some(report) = report {
                let silent = report.exit_code.is_none() && report.exit_signal.is_none();
                if silent && !connection_lost && self.loss_revealed(log.as_ref()) {
                    connection_lost = true;
                }
                let outcome = ExitOutcome::from_report(&report, connection_lost);
                log.println(&outcome.to_string());
            }
            match session.close() {
                Ok(()) => {}
                Err(e) if connection_lost => {
                    tracing::debug!("{}: channel close on lost transport: {}", self.id, e);
                }
                Err(e) => log.error(CLOSE_ERROR, Some(&e)),
            }
        }

        if !connection_lost {
            self.clean_up_remote(&log);
        }

        self.release();
        tracing::info!("session {} closed", self.id);
        Ok(())
    }

    fn report_transport_loss(&self, log: &dyn LogSink) -> Result<bool, TransportError> {
        let cause = self.transport.closed_cause()?;
        if let Some(cause) = &cause {
            log.error(TRANSPORT_LOST, Some(cause));
        }
        Ok(cause.is_some())
    }

    /// Second look after the exit wait, which can be the first thing to
    /// touch a dead socket. A failed check here counts as "not lost".
    fn loss_revealed(&self, log: &dyn LogSink) -> bool {
        match self.transport.closed_cause() {
            Ok(Some(cause)) => {
                log.error(TRANSPORT_LOST, Some(&cause));
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::debug!("{}: loss re-check failed: {}", self.id, e);
                false
            }
        }
    }

    /// Delete the agent jar, waiting at most the cleanup budget.
    fn clean_up_remote(&self, log: &Arc<dyn LogSink>) {
        let Some(node) = self.params.owner() else {
            tracing::debug!("{}: owner node is gone, skipping cleanup", self.id);
            return;
        };
        let Some(root) = node.remote_root() else {
            tracing::debug!("{}: {} has no remote root", self.id, node.name());
            return;
        };

        let task = CleanupTask::new(
            artifact_path(&root),
            Arc::clone(&self.transport),
            Arc::clone(log),
        );
        let mut handle = self.pool.submit(move |cancel| task.run(cancel));

        let budget = self.params.cleanup_wait();
        if let Err(e) = handle.wait(budget, self.params.interrupt()) {
            log.error(&deletion_error_message(), Some(&e));
            if !handle.is_finished() {
                handle.cancel();
            }
        }
    }

    fn release(&self) {
        self.registry.unregister(self.id);
        self.transport.disconnect();
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        if self.is_open() {
            tracing::warn!("session {} dropped while open; closing", self.id);
            if let Err(e) = self.close() {
                tracing::warn!("close on drop failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConnection")
            .field("id", &self.id)
            .field("endpoint", &self.transport.endpoint())
            .field("open", &self.is_open())
            .finish()
    }
}

fn open_execution_session(
    transport: &dyn Transport,
    log: &dyn LogSink,
) -> Result<Box<dyn ExecSession>, TransportError> {
    let mut session = transport.open_session()?;
    match session.set_window_size(WINDOW_SIZE) {
        Ok(()) => log.println(&format!(
            "Expanded the channel window size to {}MB",
            WINDOW_SIZE / (1024 * 1024)
        )),
        Err(e) => {
            tracing::warn!("could not expand channel window: {}", e);
            log.println(&format!("Warning: channel window left at default: {}", e));
        }
    }
    Ok(session)
}

/// Undo a half-open connection and wrap the cause.
fn abort(transport: &dyn Transport, endpoint: &str, source: TransportError) -> Error {
    transport.disconnect();
    Error::Connect {
        endpoint: endpoint.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{AgentNode, Credentials};
    use crate::core::types::Agent;
    use crate::hostkey::{HostKey, HostKeyVerifier, NonVerifying};
    use crate::tasklog::MemoryLog;
    use crate::transport::mock::{MockTransport, Removal};
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    /// Hands out a fixed algorithm list.
    struct FixedAlgorithms(Option<Vec<String>>);

    impl HostKeyVerifier for FixedAlgorithms {
        fn preferred_key_algorithms(&self, _target: &HostTarget<'_>) -> Option<Vec<String>> {
            self.0.clone()
        }

        fn verify(&self, _target: &HostTarget<'_>, _key: &HostKey) -> Result<(), String> {
            Ok(())
        }
    }

    struct Fixture {
        mock: MockTransport,
        log: Arc<MemoryLog>,
        registry: Arc<ConnectionRegistry>,
        pool: WorkerPool,
        node: Arc<dyn AgentNode>,
    }

    impl Fixture {
        fn new(mock: MockTransport) -> Self {
            Self {
                mock,
                log: Arc::new(MemoryLog::new()),
                registry: Arc::new(ConnectionRegistry::new()),
                pool: WorkerPool::new().unwrap(),
                node: Arc::new(Agent {
                    name: "build-01".into(),
                    remote_root: Some("/home/agent/".into()),
                }),
            }
        }

        fn params(&self) -> ConnectionParameters {
            self.params_with(Arc::new(NonVerifying))
        }

        fn params_with(&self, verifier: Arc<dyn HostKeyVerifier>) -> ConnectionParameters {
            ConnectionParameters::new(
                "build-01",
                22,
                Credentials::agent("jenkins"),
                verifier,
                Arc::clone(&self.log) as Arc<dyn LogSink>,
            )
            .unwrap()
            .with_owner(&self.node)
        }

        fn open_with(&self, params: ConnectionParameters) -> Result<SessionConnection> {
            SessionConnection::open(
                Arc::new(self.mock.clone()),
                params,
                Arc::clone(&self.registry),
                self.pool.clone(),
            )
        }

        fn open(&self) -> SessionConnection {
            self.open_with(self.params()).unwrap()
        }
    }

    #[test]
    fn test_sl044_restricts_to_exact_algorithm_list() {
        let fx = Fixture::new(MockTransport::new());
        let list = vec!["ssh-ed25519".to_string(), "ecdsa-sha2-nistp256".to_string()];
        let conn = fx
            .open_with(fx.params_with(Arc::new(FixedAlgorithms(Some(list.clone())))))
            .unwrap();
        assert_eq!(fx.mock.with(|s| s.restricted.clone()), Some(list));
        assert!(!fx.log.contains("restriction disabled"));
        drop(conn);
    }

    #[test]
    fn test_sl044_missing_or_empty_list_warns() {
        for algorithms in [None, Some(vec![])] {
            let fx = Fixture::new(MockTransport::new());
            let mut conn = fx
                .open_with(fx.params_with(Arc::new(FixedAlgorithms(algorithms))))
                .unwrap();
            assert!(fx.mock.with(|s| s.restricted.is_none()));
            assert_eq!(fx.log.count(NO_ALGORITHMS_WARNING), 1);
            conn.close().unwrap();
        }
    }

    #[test]
    fn test_sl044_open_widens_window_and_registers() {
        let fx = Fixture::new(MockTransport::new());
        let conn = fx.open();
        assert!(conn.is_open());
        assert!(fx.mock.with(|s| s.established));
        assert_eq!(fx.mock.with(|s| s.window), Some(4 * 1024 * 1024));
        assert!(fx.log.contains("Expanded the channel window size to 4MB"));
        assert!(fx.registry.contains(conn.id()));
    }

    #[test]
    fn test_sl044_window_failure_is_not_fatal() {
        let fx = Fixture::new(MockTransport::new().script(|s| s.fail_window = true));
        let conn = fx.open();
        assert!(conn.is_open());
        assert!(fx.log.contains("channel window left at default"));
    }

    #[test]
    fn test_sl044_establish_failure_leaves_nothing_registered() {
        let fx = Fixture::new(MockTransport::new().script(|s| s.fail_establish = true));
        let err = fx.open_with(fx.params()).unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(fx.registry.is_empty());
        assert_eq!(fx.mock.with(|s| s.disconnects), 1);
    }

    #[test]
    fn test_sl044_session_failure_unregisters() {
        let fx = Fixture::new(MockTransport::new().script(|s| s.fail_open_session = true));
        let err = fx.open_with(fx.params()).unwrap_err();
        assert!(err.to_string().contains("session refused"));
        assert!(fx.registry.is_empty());
        assert_eq!(fx.mock.with(|s| s.disconnects), 1);
    }

    #[test]
    fn test_sl044_open_then_close_unregisters() {
        let fx = Fixture::new(MockTransport::new());
        let mut conn = fx.open();
        let id = conn.id();
        conn.close().unwrap();
        assert!(!conn.is_open());
        assert!(!fx.registry.contains(id));
        assert!(fx.mock.with(|s| s.session_closed));
        assert_eq!(fx.mock.with(|s| s.disconnects), 1);
    }

    #[test]
    fn test_sl044_close_is_idempotent() {
        let fx =
            Fixture::new(MockTransport::new().script(|s| s.exit_report = ExitReport::code(0)));
        let mut conn = fx.open();
        conn.close().unwrap();
        conn.close().unwrap();
        assert_eq!(fx.mock.with(|s| s.removals.len()), 1);
        assert_eq!(fx.mock.with(|s| s.exit_waits.len()), 1);
        assert_eq!(fx.mock.with(|s| s.disconnects), 1);
        assert_eq!(fx.log.count("Exit code="), 1);
    }

    #[test]
    fn test_sl044_outcome_messages() {
        let cases = [
            (ExitReport::code(0), None, "Exit code=0"),
            (ExitReport::signal("KILL"), None, "Exit signal=KILL"),
            (
                ExitReport::default(),
                Some("reset by peer"),
                "has not reported exit code before the socket was lost",
            ),
            (ExitReport::default(), None, "Is it still running?"),
        ];
        for (report, loss, expected) in cases {
            let fx = Fixture::new(MockTransport::new().script(|s| s.exit_report = report));
            let mut conn = fx.open();
            fx.mock.state.lock().loss = loss.map(str::to_string);
            conn.close().unwrap();
            assert!(fx.log.contains(expected), "missing {:?} in\n{}", expected, fx.log.contents());
            assert_eq!(fx.mock.with(|s| s.exit_waits.clone()), vec![EXIT_WAIT]);
        }
    }

    #[test]
    fn test_sl044_exit_code_wins_over_loss() {
        let report = ExitReport {
            exit_code: Some(137),
            exit_signal: Some("KILL".into()),
        };
        assert_eq!(ExitOutcome::from_report(&report, true), ExitOutcome::Exited(137));
        assert_eq!(
            ExitOutcome::from_report(&ExitReport::default(), true),
            ExitOutcome::LostBeforeReport
        );
        assert_eq!(
            ExitOutcome::from_report(&ExitReport::default(), false),
            ExitOutcome::NoReport
        );
    }

    #[test]
    fn test_sl044_transport_loss_logged_and_skips_cleanup() {
        let fx = Fixture::new(MockTransport::new());
        let mut conn = fx.open();
        fx.mock.state.lock().loss = Some("Connection reset by peer".into());
        conn.close().unwrap();
        let errors = fx.log.errors();
        assert_eq!(errors[0].message, TRANSPORT_LOST);
        assert!(errors[0].causes[0].contains("Connection reset by peer"));
        assert!(fx.mock.with(|s| s.removals.is_empty()));
        assert!(!fx.registry.contains(conn.id()));
    }

    #[test]
    fn test_sl044_deleted_owner_skips_cleanup() {
        let mut fx = Fixture::new(MockTransport::new());
        let mut conn = fx.open();
        fx.node = Arc::new(Agent {
            name: "other".into(),
            remote_root: None,
        });
        conn.close().unwrap();
        assert!(fx.mock.with(|s| s.removals.is_empty()));
        assert!(!fx.registry.contains(conn.id()));
    }

    #[test]
    fn test_sl044_no_remote_root_skips_cleanup() {
        let mut fx = Fixture::new(MockTransport::new());
        fx.node = Arc::new(Agent {
            name: "rootless".into(),
            remote_root: None,
        });
        let mut conn = fx.open();
        conn.close().unwrap();
        assert!(fx.mock.with(|s| s.removals.is_empty()));
    }

    #[test]
    fn test_sl044_cleanup_removes_agent_jar() {
        let fx = Fixture::new(MockTransport::new());
        let mut conn = fx.open();
        conn.close().unwrap();
        assert_eq!(
            fx.mock.with(|s| s.removals.clone()),
            vec!["/home/agent/remoting.jar"]
        );
        assert!(fx.log.errors().is_empty());
    }

    #[test]
    fn test_sl044_cleanup_fallback_via_shell() {
        let fx = Fixture::new(MockTransport::new().script(|s| s.removal = Removal::Unsupported));
        let mut conn = fx.open();
        conn.close().unwrap();
        assert_eq!(
            fx.mock.with(|s| s.exec_calls.clone()),
            vec!["rm '/home/agent/remoting.jar'"]
        );
    }

    #[test]
    fn test_sl044_cleanup_timeout_logged_and_cancelled() {
        let fx = Fixture::new(MockTransport::new().script(|s| {
            s.removal = Removal::Unsupported;
            s.removal_delay = Duration::from_millis(2500);
        }));
        let mut conn = fx.open_with(fx.params().with_launch_timeout(1)).unwrap();

        let start = Instant::now();
        conn.close().unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1));
        assert!(waited < Duration::from_millis(2400));
        assert!(fx.log.contains("[SSH] Error deleting file"));
        assert!(fx.log.contains("timed out after 1s"));

        // The cancelled task must not go on to the shell fallback.
        std::thread::sleep(Duration::from_millis(2000));
        assert!(fx.mock.with(|s| s.exec_calls.is_empty()));
    }

    #[test]
    fn test_sl044_interrupted_cleanup_keeps_interrupt() {
        let fx = Fixture::new(MockTransport::new().script(|s| {
            s.removal_delay = Duration::from_millis(1500);
        }));
        let interrupt = CancellationToken::new();
        let mut conn = fx
            .open_with(fx.params().with_interrupt(interrupt.clone()))
            .unwrap();
        interrupt.cancel();

        let start = Instant::now();
        conn.close().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(fx.log.contains("interrupted while waiting"));
        assert!(interrupt.is_cancelled());
        assert!(!fx.registry.contains(conn.id()));
    }

    #[test]
    fn test_sl044_outcome_error_does_not_stop_close() {
        let fx = Fixture::new(MockTransport::new().script(|s| s.fail_exit_wait = true));
        let mut conn = fx.open();
        conn.close().unwrap();
        assert_eq!(fx.log.count(CLOSE_ERROR), 1);
        assert!(fx.log.contains("exit wait failed"));
        assert_eq!(fx.mock.with(|s| s.removals.len()), 1);
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_sl044_dead_socket_wait_reports_lost() {
        let fx = Fixture::new(MockTransport::new().script(|s| {
            s.fail_exit_wait = true;
            s.fail_session_close = true;
        }));
        let mut conn = fx.open();
        fx.mock.state.lock().loss = Some("Failure while reading from socket".into());
        conn.close().unwrap();
        assert!(fx
            .log
            .contains("has not reported exit code before the socket was lost"));
        assert_eq!(fx.log.count(CLOSE_ERROR), 0);
        assert_eq!(fx.log.count(TRANSPORT_LOST), 1);
        assert!(fx.mock.with(|s| s.removals.is_empty()));
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_sl044_loss_found_by_exit_wait() {
        let fx = Fixture::new(MockTransport::new().script(|s| s.lose_during_exit_wait = true));
        let mut conn = fx.open();
        conn.close().unwrap();
        assert_eq!(fx.log.count(TRANSPORT_LOST), 1);
        assert!(fx
            .log
            .contains("has not reported exit code before the socket was lost"));
        assert_eq!(fx.log.count(CLOSE_ERROR), 0);
        assert!(fx.mock.with(|s| s.removals.is_empty()));
    }

    #[test]
    fn test_sl044_channel_close_error_logged_when_healthy() {
        let fx = Fixture::new(MockTransport::new().script(|s| s.fail_session_close = true));
        let mut conn = fx.open();
        conn.close().unwrap();
        assert_eq!(fx.log.count(CLOSE_ERROR), 1);
        assert_eq!(fx.mock.with(|s| s.removals.len()), 1);
    }

    #[test]
    fn test_sl044_loss_check_fault_propagates() {
        let fx = Fixture::new(MockTransport::new());
        let mut conn = fx.open();
        fx.mock.state.lock().fail_loss_check = true;
        assert!(matches!(conn.close(), Err(Error::Close(_))));
        assert!(!conn.is_open());
        assert!(fx.registry.is_empty());
        conn.close().unwrap();
    }

    #[test]
    fn test_sl044_exec_streams_output() {
        let fx = Fixture::new(MockTransport::new().script(|s| {
            s.exec_output = b"x86_64\n".to_vec();
            s.exec_exit = 3;
        }));
        let mut conn = fx.open();
        let mut out = Vec::new();
        assert_eq!(conn.exec("uname -m", &mut out).unwrap(), 3);
        assert_eq!(out, b"x86_64\n");

        fx.mock.state.lock().fail_exec = true;
        assert!(matches!(conn.exec("true", &mut out), Err(Error::Exec(_))));

        conn.close().unwrap();
        assert!(matches!(conn.exec("true", &mut out), Err(Error::NotOpen)));
    }

    #[test]
    fn test_sl044_launch_worker_once() {
        let fx = Fixture::new(MockTransport::new());
        let mut conn = fx.open();
        conn.launch_worker("java -jar remoting.jar").unwrap();
        assert!(matches!(
            conn.launch_worker("again"),
            Err(Error::WorkerAlreadyLaunched)
        ));
        assert_eq!(
            fx.mock.with(|s| s.started.clone()),
            vec!["java -jar remoting.jar"]
        );
        conn.close().unwrap();
        assert!(matches!(conn.launch_worker("x"), Err(Error::NotOpen)));
    }

    #[test]
    fn test_sl044_drop_closes() {
        let fx = Fixture::new(MockTransport::new());
        let conn = fx.open();
        assert_eq!(fx.registry.len(), 1);
        drop(conn);
        assert!(fx.registry.is_empty());
        assert!(fx.log.contains("Is it still running?"));
    }
}
