//! SL-050: CLI subcommands — validate, exec, launch.

use crate::connection::cleanup::artifact_path;
use crate::connection::{
    factory_for, AgentNode, ConnectionParameters, ConnectionRegistry, Credentials,
    SessionConnection, WorkerPool,
};
use crate::core::parser;
use crate::core::types::{Agent, AgentSpec, CredentialSpec, LaunchConfig};
use crate::hostkey;
use crate::tasklog::eventlog::event_log_path;
use crate::tasklog::{EventLog, LogSink, StreamLog};
use clap::Subcommand;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate sshlaunch.yaml without connecting
    Validate {
        /// Path to sshlaunch.yaml
        #[arg(short, long, default_value = "sshlaunch.yaml")]
        file: PathBuf,
    },

    /// Run one command on an agent host
    Exec {
        /// Path to sshlaunch.yaml
        #[arg(short, long, default_value = "sshlaunch.yaml")]
        file: PathBuf,

        /// Agent to connect to
        #[arg(short, long)]
        agent: String,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Start the agent process and stream its output until it exits
    Launch {
        /// Path to sshlaunch.yaml
        #[arg(short, long, default_value = "sshlaunch.yaml")]
        file: PathBuf,

        /// Agent to launch
        #[arg(short, long)]
        agent: String,

        /// Append launch log lines as JSONL to <DIR>/<agent>/launch.jsonl
        /// instead of stderr
        #[arg(long, value_name = "DIR")]
        event_log: Option<PathBuf>,
    },
}

/// Dispatch a CLI command. Returns the process exit code.
pub fn dispatch(cmd: Commands) -> Result<i32, String> {
    match cmd {
        Commands::Validate { file } => cmd_validate(&file).map(|()| 0),
        Commands::Exec {
            file,
            agent,
            command,
        } => cmd_exec(&file, &agent, &command.join(" ")),
        Commands::Launch {
            file,
            agent,
            event_log,
        } => cmd_launch(&file, &agent, event_log.as_deref()),
    }
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        println!(
            "OK: {} agent(s), transport {:?}",
            config.agents.len(),
            config.transport
        );
        for (name, agent) in &config.agents {
            println!("  {} → {}@{}:{}", name, agent.user, agent.host, agent.port);
        }
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse and validate, printing every problem found.
fn parse_and_validate(file: &Path) -> Result<LaunchConfig, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err("validation failed".to_string())
}

/// Resolve credentials, pulling secrets from the environment via `env`.
fn credentials_for(
    spec: &AgentSpec,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, String> {
    match &spec.credentials {
        CredentialSpec::Key {
            path,
            passphrase_env,
        } => {
            let passphrase = match passphrase_env {
                Some(var) => Some(env(var).ok_or_else(|| format!("${} is not set", var))?),
                None => None,
            };
            Ok(Credentials::key_file(
                &spec.user,
                parser::expand_home(path),
                passphrase,
            ))
        }
        CredentialSpec::Password { env: var } => {
            let password = env(var).ok_or_else(|| format!("${} is not set", var))?;
            Ok(Credentials::password(&spec.user, password))
        }
        CredentialSpec::Agent => Ok(Credentials::agent(&spec.user)),
    }
}

/// Configured command, or the stock jar invocation under the remote root.
fn agent_command(name: &str, spec: &AgentSpec) -> Result<String, String> {
    if let Some(command) = &spec.command {
        return Ok(command.clone());
    }
    match &spec.remote_root {
        Some(root) => Ok(format!("java -jar {}", artifact_path(root))),
        None => Err(format!(
            "agent '{}' has neither a command nor a remote_root",
            name
        )),
    }
}

fn build_params(
    spec: &AgentSpec,
    node: &Arc<dyn AgentNode>,
    log: Arc<dyn LogSink>,
    interrupt: CancellationToken,
) -> Result<ConnectionParameters, String> {
    let port = u16::try_from(spec.port).map_err(|_| format!("port {} out of range", spec.port))?;
    let verifier = hostkey::from_policy(&spec.host_key)?;
    let credentials = credentials_for(spec, |var| std::env::var(var).ok())?;
    let mut params = ConnectionParameters::new(&spec.host, port, credentials, verifier, log)
        .map_err(|e| e.to_string())?
        .with_owner(node)
        .with_interrupt(interrupt);
    if let Some(seconds) = spec.launch_timeout {
        params = params.with_launch_timeout(seconds);
    }
    Ok(params)
}

/// Ctrl-C escalation. The first press stops streaming agent output, the
/// second interrupts the cleanup wait in `close`, the third exits.
#[derive(Clone, Default)]
struct Escalation {
    stop: CancellationToken,
    interrupt: CancellationToken,
}

impl Escalation {
    /// Apply one Ctrl-C. Returns false once there is nothing left to cancel.
    fn escalate(&self) -> bool {
        if !self.stop.is_cancelled() {
            eprintln!("stopping agent stream; press Ctrl-C again to skip remote cleanup");
            self.stop.cancel();
            true
        } else if !self.interrupt.is_cancelled() {
            eprintln!("interrupting remote cleanup; press Ctrl-C again to abort");
            self.interrupt.cancel();
            true
        } else {
            false
        }
    }
}

/// Shared plumbing for one connection: registry, pool, Ctrl-C tokens.
struct Launcher {
    config: LaunchConfig,
    registry: Arc<ConnectionRegistry>,
    pool: WorkerPool,
    escalation: Escalation,
}

impl Launcher {
    fn new(file: &Path) -> Result<Self, String> {
        let config = parse_and_validate(file)?;
        let pool = WorkerPool::new().map_err(|e| format!("cannot start worker pool: {}", e))?;
        Ok(Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            pool,
            escalation: Escalation::default(),
        })
    }

    fn watch_ctrl_c(&self) {
        let escalation = self.escalation.clone();
        self.pool.handle().spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !escalation.escalate() {
                    std::process::exit(130);
                }
            }
        });
    }

    fn connect(
        &self,
        name: &str,
        node: &Arc<dyn AgentNode>,
        log: Arc<dyn LogSink>,
    ) -> Result<SessionConnection, String> {
        let spec = parser::find_agent(&self.config, name)?;
        let params = build_params(spec, node, log, self.escalation.interrupt.clone())?;
        let factory = factory_for(
            self.config.transport,
            Arc::clone(&self.registry),
            self.pool.clone(),
        );
        factory.connect(params).map_err(|e| e.to_string())
    }

    fn node(&self, name: &str) -> Result<Arc<dyn AgentNode>, String> {
        let spec = parser::find_agent(&self.config, name)?;
        Ok(Arc::new(Agent::from_spec(name, spec)))
    }
}

impl Drop for Launcher {
    fn drop(&mut self) {
        let leaked = self.registry.shutdown();
        if leaked > 0 {
            tracing::warn!("{} connection(s) were still open at exit", leaked);
        }
    }
}

fn cmd_exec(file: &Path, agent: &str, command: &str) -> Result<i32, String> {
    let launcher = Launcher::new(file)?;
    let node = launcher.node(agent)?;
    let log: Arc<dyn LogSink> = Arc::new(StreamLog::new(std::io::stderr()));
    let mut conn = launcher.connect(agent, &node, log)?;

    let mut stdout = std::io::stdout();
    let result = conn.exec(command, &mut stdout);
    let _ = stdout.flush();
    let closed = conn.close();

    let code = result.map_err(|e| e.to_string())?;
    closed.map_err(|e| e.to_string())?;
    Ok(code)
}

fn cmd_launch(file: &Path, agent: &str, event_dir: Option<&Path>) -> Result<i32, String> {
    let launcher = Launcher::new(file)?;
    let spec = parser::find_agent(&launcher.config, agent)?;
    let command = agent_command(agent, spec)?;
    let node = launcher.node(agent)?;
    let log: Arc<dyn LogSink> = match event_dir {
        Some(dir) => {
            let path = event_log_path(dir, agent);
            Arc::new(
                EventLog::open(&path)
                    .map_err(|e| format!("cannot open {}: {}", path.display(), e))?,
            )
        }
        None => Arc::new(StreamLog::new(std::io::stderr())),
    };

    launcher.watch_ctrl_c();
    let mut conn = launcher.connect(agent, &node, log)?;
    let pumped = conn
        .launch_worker(&command)
        .map_err(|e| e.to_string())
        .and_then(|mut stream| {
            pump(&mut stream, &mut std::io::stdout(), &launcher.escalation.stop)
                .map_err(|e| format!("agent stream: {}", e))
        });
    let closed = conn.close().map_err(|e| e.to_string());

    let bytes = pumped?;
    closed?;
    tracing::info!("agent '{}' streamed {} bytes", agent, bytes);
    Ok(0)
}

/// Copy `from` into `to` until EOF or `stop` fires. Returns bytes copied.
///
/// `from` is expected to return `WouldBlock` or `TimedOut` periodically
/// while idle so that `stop` gets looked at.
fn pump(
    from: &mut dyn Read,
    to: &mut dyn Write,
    stop: &CancellationToken,
) -> std::io::Result<u64> {
    let mut buf = [0u8; 32 * 1024];
    let mut total = 0u64;
    while !stop.is_cancelled() {
        let n = match from.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => return Err(e),
        };
        to.write_all(&buf[..n])?;
        to.flush()?;
        total += n as u64;
    }
    Ok(total)
}
