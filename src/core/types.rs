//! SL-010: Launch configuration types.
//!
//! Defines the YAML schema for agents, their credentials and host-key
//! policy. All types derive Serialize/Deserialize for YAML roundtripping.

use crate::connection::AgentNode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ============================================================================
// Top-level sshlaunch.yaml
// ============================================================================

/// Root configuration — the agents this launcher can bring up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Connection strategy used for every agent
    #[serde(default)]
    pub transport: FactoryKind,

    /// Agent inventory (order-preserving)
    #[serde(default)]
    pub agents: IndexMap<String, AgentSpec>,
}

/// Which connection factory to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactoryKind {
    /// libssh2 over a blocking TCP socket
    #[default]
    Blocking,
}

// ============================================================================
// Agents
// ============================================================================

/// A remote host that runs one agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Network address (IP or DNS)
    pub host: String,

    /// SSH port. Kept wide so out-of-range values reach validation.
    #[serde(default = "default_port")]
    pub port: u32,

    /// SSH user
    #[serde(default = "default_user")]
    pub user: String,

    /// How to authenticate
    #[serde(default)]
    pub credentials: CredentialSpec,

    /// Agent working directory on the remote host
    #[serde(default)]
    pub remote_root: Option<String>,

    /// Launch timeout in seconds; also bounds the cleanup wait
    #[serde(default)]
    pub launch_timeout: Option<u64>,

    /// Host key verification policy
    #[serde(default)]
    pub host_key: HostKeyPolicy,

    /// Command that starts the agent process
    #[serde(default)]
    pub command: Option<String>,
}

fn default_port() -> u32 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

/// Credential source. Secrets themselves never live in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CredentialSpec {
    /// Private key file, optional passphrase read from an env var
    Key {
        path: String,
        #[serde(default)]
        passphrase_env: Option<String>,
    },
    /// Password read from an env var
    Password { env: String },
    /// Running ssh-agent
    #[default]
    Agent,
}

/// Host key verification policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept any key, negotiate any algorithm
    NonVerifying,
    /// OpenSSH known_hosts file
    KnownHosts {
        #[serde(default = "default_known_hosts")]
        path: String,
    },
    /// One pinned key: algorithm name + base64 blob
    Manual { algorithm: String, key: String },
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::KnownHosts {
            path: default_known_hosts(),
        }
    }
}

fn default_known_hosts() -> String {
    "~/.ssh/known_hosts".to_string()
}

// ============================================================================
// Runtime node
// ============================================================================

/// A configured agent as seen by a live connection.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub remote_root: Option<String>,
}

impl Agent {
    pub fn from_spec(name: &str, spec: &AgentSpec) -> Self {
        Self {
            name: name.to_string(),
            remote_root: spec.remote_root.clone(),
        }
    }
}

impl AgentNode for Agent {
    fn name(&self) -> &str {
        &self.name
    }

    fn remote_root(&self) -> Option<String> {
        self.remote_root.clone()
    }
}
