//! SL-040: Connection parameters.

use super::AgentNode;
use crate::error::Error;
use crate::hostkey::HostKeyVerifier;
use crate::tasklog::LogSink;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cleanup wait when no launch timeout is configured.
pub const DEFAULT_CLEANUP_WAIT_SECS: u64 = 60;

/// Authentication material. Never printed.
#[derive(Clone)]
pub enum Secret {
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
    Agent,
}

#[derive(Clone)]
pub struct Credentials {
    username: String,
    secret: Secret,
}

impl Credentials {
    pub fn key_file(username: &str, path: PathBuf, passphrase: Option<String>) -> Self {
        Self {
            username: username.to_string(),
            secret: Secret::KeyFile { path, passphrase },
        }
    }

    pub fn password(username: &str, password: String) -> Self {
        Self {
            username: username.to_string(),
            secret: Secret::Password(password),
        }
    }

    pub fn agent(username: &str) -> Self {
        Self {
            username: username.to_string(),
            secret: Secret::Agent,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.secret {
            Secret::KeyFile { .. } => "key-file",
            Secret::Password(_) => "password",
            Secret::Agent => "agent",
        };
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &format_args!("<{} redacted>", kind))
            .finish()
    }
}

/// Everything needed to open one connection. Immutable once built.
#[derive(Clone)]
pub struct ConnectionParameters {
    host: String,
    port: u16,
    credentials: Credentials,
    verifier: Arc<dyn HostKeyVerifier>,
    owner: Option<Weak<dyn AgentNode>>,
    log: Arc<dyn LogSink>,
    launch_timeout: Option<u64>,
    interrupt: Option<CancellationToken>,
}

impl ConnectionParameters {
    pub fn new(
        host: &str,
        port: u16,
        credentials: Credentials,
        verifier: Arc<dyn HostKeyVerifier>,
        log: Arc<dyn LogSink>,
    ) -> Result<Self, Error> {
        if host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if port == 0 {
            return Err(Error::Config("port must be in 1..=65535".to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            credentials,
            verifier,
            owner: None,
            log,
            launch_timeout: None,
            interrupt: None,
        })
    }

    /// Back-reference to the node this connection serves. Not kept alive.
    pub fn with_owner(mut self, owner: &Arc<dyn AgentNode>) -> Self {
        self.owner = Some(Arc::downgrade(owner));
        self
    }

    pub fn with_launch_timeout(mut self, seconds: u64) -> Self {
        self.launch_timeout = Some(seconds);
        self
    }

    /// Token that interrupts a blocked `close()`.
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn verifier(&self) -> &Arc<dyn HostKeyVerifier> {
        &self.verifier
    }

    /// The owning node, if it still exists.
    pub fn owner(&self) -> Option<Arc<dyn AgentNode>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    pub fn log(&self) -> &Arc<dyn LogSink> {
        &self.log
    }

    pub fn launch_timeout(&self) -> Option<u64> {
        self.launch_timeout
    }

    pub fn interrupt(&self) -> Option<&CancellationToken> {
        self.interrupt.as_ref()
    }

    /// How long `close()` waits for remote cleanup.
    pub fn cleanup_wait(&self) -> Duration {
        Duration::from_secs(self.launch_timeout.unwrap_or(DEFAULT_CLEANUP_WAIT_SECS))
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credentials", &self.credentials)
            .field("owner", &self.owner().map(|n| n.name().to_string()))
            .field("launch_timeout", &self.launch_timeout)
            .finish_non_exhaustive()
    }
}
