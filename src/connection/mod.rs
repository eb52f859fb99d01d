//! Connection lifecycle: parameters, factories, sessions, cleanup.

pub mod cleanup;
pub mod factory;
pub mod params;
pub mod pool;
pub mod registry;
pub mod session;

pub use factory::{factory_for, BlockingConnectionFactory, ConnectionFactory};
pub use params::{ConnectionParameters, Credentials, Secret};
pub use pool::WorkerPool;
pub use registry::{ConnectionRegistry, TransportId};
pub use session::{ExitOutcome, SessionConnection};

/// The node a connection serves. Connections only hold it weakly.
pub trait AgentNode: Send + Sync {
    fn name(&self) -> &str;

    /// Agent working directory on the remote host, if configured.
    fn remote_root(&self) -> Option<String>;
}
