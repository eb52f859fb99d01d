//! SL-045: Connection factories.
//!
//! A factory turns parameters into an open [`SessionConnection`]. Which
//! factory runs is chosen by [`FactoryKind`] in the config, never by probing.

use super::params::ConnectionParameters;
use super::pool::WorkerPool;
use super::registry::ConnectionRegistry;
use super::session::SessionConnection;
use crate::core::types::FactoryKind;
use crate::error::{Error, Result};
use crate::transport::SshTransport;
use std::sync::Arc;
use std::time::Duration;

pub trait ConnectionFactory: Send + Sync {
    /// Open a connection and its execution session. Fails unless both are up.
    fn connect(&self, params: ConnectionParameters) -> Result<SessionConnection>;
}

/// libssh2 with blocking socket I/O.
pub struct BlockingConnectionFactory {
    registry: Arc<ConnectionRegistry>,
    pool: WorkerPool,
}

impl BlockingConnectionFactory {
    pub fn new(registry: Arc<ConnectionRegistry>, pool: WorkerPool) -> Self {
        Self { registry, pool }
    }
}

impl ConnectionFactory for BlockingConnectionFactory {
    fn connect(&self, params: ConnectionParameters) -> Result<SessionConnection> {
        let timeout = params.launch_timeout().map(Duration::from_secs);
        tracing::debug!("connecting to {}:{}", params.host(), params.port());
        let transport = SshTransport::connect(params.host(), params.port(), timeout).map_err(
            |source| Error::Connect {
                endpoint: format!("{}:{}", params.host(), params.port()),
                source,
            },
        )?;
        SessionConnection::open(
            Arc::new(transport),
            params,
            Arc::clone(&self.registry),
            self.pool.clone(),
        )
    }
}

/// Build the factory named by the config.
pub fn factory_for(
    kind: FactoryKind,
    registry: Arc<ConnectionRegistry>,
    pool: WorkerPool,
) -> Box<dyn ConnectionFactory> {
    match kind {
        FactoryKind::Blocking => Box::new(BlockingConnectionFactory::new(registry, pool)),
    }
}
