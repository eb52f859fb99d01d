//! SL-021: OpenSSH known_hosts strategy.
//!
//! Plain host patterns only. Hashed (`|1|`) entries and `@cert-authority` /
//! `@revoked` markers are skipped.

use super::{HostKey, HostKeyVerifier, HostTarget};
use base64::Engine;
use std::path::Path;

#[derive(Debug, Clone)]
struct Entry {
    patterns: Vec<String>,
    algorithm: String,
    key: Vec<u8>,
}

/// Known hosts loaded from disk once.
#[derive(Debug, Clone, Default)]
pub struct KnownHostsFile {
    entries: Vec<Entry>,
}

impl KnownHostsFile {
    /// Load a known_hosts file. A missing file yields an empty set.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("{} does not exist; no hosts are known", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn parse(content: &str) -> Self {
        let entries = content.lines().filter_map(parse_line).collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matching<'a>(&'a self, target: &HostTarget<'_>) -> impl Iterator<Item = &'a Entry> + 'a {
        let wanted = host_pattern(target.host, target.port);
        self.entries
            .iter()
            .filter(move |e| e.patterns.iter().any(|p| *p == wanted))
    }
}

fn parse_line(line: &str) -> Option<Entry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
        return None;
    }
    let mut fields = line.split_whitespace();
    let hosts = fields.next()?;
    let algorithm = fields.next()?;
    let blob = fields.next()?;
    if hosts.starts_with('|') {
        tracing::debug!("skipping hashed known_hosts entry");
        return None;
    }
    let key = base64::engine::general_purpose::STANDARD
        .decode(blob)
        .ok()?;
    let patterns = hosts
        .split(',')
        .filter(|p| !p.starts_with('!'))
        .map(str::to_string)
        .collect();
    Some(Entry {
        patterns,
        algorithm: algorithm.to_string(),
        key,
    })
}

/// `host` on the default port, `[host]:port` otherwise.
fn host_pattern(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

impl HostKeyVerifier for KnownHostsFile {
    fn preferred_key_algorithms(&self, target: &HostTarget<'_>) -> Option<Vec<String>> {
        let mut algorithms: Vec<String> = Vec::new();
        for entry in self.matching(target) {
            if !algorithms.contains(&entry.algorithm) {
                algorithms.push(entry.algorithm.clone());
            }
        }
        (!algorithms.is_empty()).then_some(algorithms)
    }

    fn verify(&self, target: &HostTarget<'_>, key: &HostKey) -> Result<(), String> {
        let mut known_any = false;
        for entry in self.matching(target) {
            known_any = true;
            if entry.algorithm == key.algorithm && entry.key == key.key {
                return Ok(());
            }
        }
        if known_any {
            Err(format!(
                "{} key for {} does not match known_hosts",
                key.algorithm,
                host_pattern(target.host, target.port)
            ))
        } else {
            Err(format!(
                "{} is not in known_hosts",
                host_pattern(target.host, target.port)
            ))
        }
    }
}
