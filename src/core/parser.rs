//! SL-011: YAML parsing and validation.
//!
//! Parses sshlaunch.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - At least one agent
//! - Host, user non-empty; port in 1..=65535
//! - Host-key and credential entries are usable

use super::types::*;
use base64::Engine;
use std::path::{Path, PathBuf};

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a sshlaunch.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<LaunchConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a sshlaunch.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<LaunchConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &LaunchConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    if config.agents.is_empty() {
        errors.push(ValidationError {
            message: "no agents defined".to_string(),
        });
    }

    for (name, agent) in &config.agents {
        validate_agent(name, agent, &mut errors);
    }

    errors
}

fn validate_agent(name: &str, agent: &AgentSpec, errors: &mut Vec<ValidationError>) {
    let mut push = |message: String| errors.push(ValidationError { message });

    if agent.host.trim().is_empty() {
        push(format!("agent '{}' has an empty host", name));
    }
    if u16::try_from(agent.port).map_or(true, |p| p == 0) {
        push(format!(
            "agent '{}' port {} is outside 1..=65535",
            name, agent.port
        ));
    }
    if agent.user.is_empty() {
        push(format!("agent '{}' has an empty user", name));
    }
    if agent.launch_timeout == Some(0) {
        push(format!("agent '{}' launch_timeout must be positive", name));
    }

    match &agent.credentials {
        CredentialSpec::Key { path, .. } if path.is_empty() => {
            push(format!("agent '{}' key credentials have no path", name));
        }
        CredentialSpec::Password { env } if env.is_empty() => {
            push(format!("agent '{}' password credentials name no env var", name));
        }
        _ => {}
    }

    match &agent.host_key {
        HostKeyPolicy::Manual { algorithm, key } => {
            if algorithm.is_empty() {
                push(format!("agent '{}' manual host key has no algorithm", name));
            }
            if base64::engine::general_purpose::STANDARD
                .decode(key.trim())
                .map_or(true, |k| k.is_empty())
            {
                push(format!(
                    "agent '{}' manual host key is not valid base64",
                    name
                ));
            }
        }
        HostKeyPolicy::KnownHosts { path } if path.is_empty() => {
            push(format!("agent '{}' known_hosts path is empty", name));
        }
        _ => {}
    }
}

/// Look up an agent by name.
pub fn find_agent<'a>(config: &'a LaunchConfig, name: &str) -> Result<&'a AgentSpec, String> {
    config.agents.get(name).ok_or_else(|| {
        let known: Vec<&str> = config.agents.keys().map(String::as_str).collect();
        format!(
            "unknown agent '{}' (known: {})",
            name,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        )
    })
}

/// Expand a leading `~/` against `$HOME`. Other paths pass through.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
