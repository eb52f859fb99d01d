//! SL-041: Registry of open transports.
//!
//! Every live connection registers its transport here so a shutdown hook
//! can force-close anything a caller leaked. One registry is created at
//! startup, shared by `Arc` with every factory, and torn down with
//! [`ConnectionRegistry::shutdown`].

use crate::transport::Transport;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a registered transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t-{}", self.0)
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    open: DashMap<TransportId, Arc<dyn Transport>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, transport: Arc<dyn Transport>) -> TransportId {
        let id = TransportId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!("registered {} ({})", id, transport.endpoint());
        self.open.insert(id, transport);
        id
    }

    /// Returns false when `id` was not registered.
    pub fn unregister(&self, id: TransportId) -> bool {
        let removed = self.open.remove(&id).is_some();
        if removed {
            tracing::debug!("unregistered {}", id);
        }
        removed
    }

    pub fn contains(&self, id: TransportId) -> bool {
        self.open.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Disconnect and forget every transport still registered. Returns how
    /// many were leaked.
    pub fn shutdown(&self) -> usize {
        // Snapshot the keys first; no shard lock is held across disconnect.
        let ids: Vec<TransportId> = self.open.iter().map(|entry| *entry.key()).collect();
        let mut leaked = 0;
        for id in ids {
            // A concurrent unregister may have won the race for this id.
            if let Some((id, transport)) = self.open.remove(&id) {
                tracing::warn!("force-closing leaked {} ({})", id, transport.endpoint());
                transport.disconnect();
                leaked += 1;
            }
        }
        leaked
    }
}
