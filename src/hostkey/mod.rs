//! SL-020: Host key verification strategies.
//!
//! A strategy does two things: it names the server host-key algorithms the
//! transport may negotiate for a target, and it accepts or rejects the key
//! the server actually presented.

pub mod known_hosts;

use crate::connection::AgentNode;
use crate::core::parser::expand_home;
use crate::core::types::HostKeyPolicy;
use base64::Engine;
use std::sync::Arc;

pub use known_hosts::KnownHostsFile;

/// The host a strategy is consulted for.
pub struct HostTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub node: Option<&'a dyn AgentNode>,
}

/// Key presented by the server during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    /// Wire name, e.g. `ssh-ed25519`
    pub algorithm: String,
    pub key: Vec<u8>,
}

pub trait HostKeyVerifier: Send + Sync {
    /// Ordered list of acceptable algorithms. `None` or empty disables the
    /// restriction.
    fn preferred_key_algorithms(&self, target: &HostTarget<'_>) -> Option<Vec<String>>;

    /// Accept or reject the key the server presented.
    fn verify(&self, target: &HostTarget<'_>, key: &HostKey) -> Result<(), String>;
}

/// Accepts anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonVerifying;

impl HostKeyVerifier for NonVerifying {
    fn preferred_key_algorithms(&self, _target: &HostTarget<'_>) -> Option<Vec<String>> {
        None
    }

    fn verify(&self, target: &HostTarget<'_>, key: &HostKey) -> Result<(), String> {
        tracing::debug!(
            "accepting unverified {} key from {}:{}",
            key.algorithm,
            target.host,
            target.port
        );
        Ok(())
    }
}

/// Exactly one pinned key.
#[derive(Debug, Clone)]
pub struct ManuallyTrusted {
    algorithm: String,
    key: Vec<u8>,
}

impl ManuallyTrusted {
    pub fn new(algorithm: &str, key: Vec<u8>) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            key,
        }
    }

    /// Build from the base64 blob found in a known_hosts or .pub file.
    pub fn from_base64(algorithm: &str, key: &str) -> Result<Self, String> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|e| format!("invalid base64 host key: {}", e))?;
        Ok(Self::new(algorithm, key))
    }
}

impl HostKeyVerifier for ManuallyTrusted {
    fn preferred_key_algorithms(&self, _target: &HostTarget<'_>) -> Option<Vec<String>> {
        Some(vec![self.algorithm.clone()])
    }

    fn verify(&self, _target: &HostTarget<'_>, key: &HostKey) -> Result<(), String> {
        if key.algorithm != self.algorithm {
            return Err(format!(
                "expected a {} key, server presented {}",
                self.algorithm, key.algorithm
            ));
        }
        if key.key != self.key {
            return Err(format!("{} key does not match the pinned key", key.algorithm));
        }
        Ok(())
    }
}

/// Build the strategy a config entry asks for.
pub fn from_policy(policy: &HostKeyPolicy) -> Result<Arc<dyn HostKeyVerifier>, String> {
    Ok(match policy {
        HostKeyPolicy::NonVerifying => Arc::new(NonVerifying),
        HostKeyPolicy::KnownHosts { path } => {
            let path = expand_home(path);
            Arc::new(
                KnownHostsFile::load(&path)
                    .map_err(|e| format!("cannot read {}: {}", path.display(), e))?,
            )
        }
        HostKeyPolicy::Manual { algorithm, key } => {
            Arc::new(ManuallyTrusted::from_base64(algorithm, key)?)
        }
    })
}
