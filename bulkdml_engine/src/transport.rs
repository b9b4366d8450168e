//! The connection to the remote record store, as seen by the engine.
//!
//! A [`Transport`] is a connection handle. The dispatcher either shares the handle bound to the
//! data source with a single worker, or gives every worker its own handle obtained through
//! [`Transport::clone_connection`].
//!
//! Process-wide connection tuning is modelled by [`ConnectionTuning`]. It is passed in
//! explicitly and applied for the duration of one parallel execution through a
//! [`ParallelConnectionGuard`], which restores the previous settings when dropped.

use std::{error::Error, fmt::Debug, num::NonZeroUsize, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::request::{BatchOutcome, ExecuteMultipleSettings, MutationOutcome, MutationRequest};

/// A failure to talk to the server at all, as opposed to a [`Fault`](crate::Fault) returned by it
#[derive(Debug, thiserror::Error)]
#[error("transport failure: {source}")]
pub struct TransportError {
    #[source]
    source: Box<dyn Error + Send + Sync>,
}

impl TransportError {
    pub fn new(source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// A connection handle to the remote record store
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Send a single request
    async fn execute(&self, request: &MutationRequest) -> Result<MutationOutcome, TransportError>;

    /// Send a set of requests in one round trip
    ///
    /// Faulted items carry the index of the request they belong to. Successful items are only
    /// returned when [`ExecuteMultipleSettings::return_responses`] is set.
    async fn execute_multiple(
        &self,
        requests: &[MutationRequest],
        settings: ExecuteMultipleSettings,
    ) -> Result<BatchOutcome, TransportError>;

    /// Create an independent handle to the same server
    ///
    /// `affinity` controls whether the new handle keeps requests pinned to the server node that
    /// first answered it.
    fn clone_connection(&self, affinity: bool) -> Result<Arc<dyn Transport>, TransportError>;

    /// Whether clones of this handle may be used concurrently
    fn can_parallelize(&self) -> bool;

    /// The degree of parallelism the server recommends for this connection, if it advertises one
    fn recommended_parallelism(&self) -> Option<NonZeroUsize> {
        None
    }
}

/// Connection settings that are raised while a parallel execution is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Maximum number of pooled connections per host
    pub connection_limit: usize,
    /// Minimum number of threads the worker pool keeps available
    pub min_worker_threads: usize,
    /// Whether small packets are coalesced before sending
    pub use_nagle: bool,
}

impl ConnectionSettings {
    /// The settings applied for the duration of a parallel execution
    pub const PARALLEL: Self = Self {
        connection_limit: 65_000,
        min_worker_threads: 100,
        use_nagle: false,
    };
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_limit: 2,
            min_worker_threads: 1,
            use_nagle: true,
        }
    }
}

/// Shared, mutable connection settings consulted when new connection handles are built
pub trait ConnectionTuning: Debug + Send + Sync + 'static {
    fn current(&self) -> ConnectionSettings;

    fn apply(&self, settings: ConnectionSettings);
}

/// The default [`ConnectionTuning`], holding the settings in memory
#[derive(Debug, Default)]
pub struct SharedConnectionSettings {
    settings: RwLock<ConnectionSettings>,
}

impl SharedConnectionSettings {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

impl ConnectionTuning for SharedConnectionSettings {
    fn current(&self) -> ConnectionSettings {
        *self.settings.read()
    }

    fn apply(&self, settings: ConnectionSettings) {
        *self.settings.write() = settings;
    }
}

/// Applies parallel connection settings and restores the previous ones when dropped
#[derive(Debug)]
pub struct ParallelConnectionGuard {
    tuning: Arc<dyn ConnectionTuning>,
    previous: ConnectionSettings,
}

impl ParallelConnectionGuard {
    pub fn acquire(tuning: Arc<dyn ConnectionTuning>, settings: ConnectionSettings) -> Self {
        let previous = tuning.current();
        tuning.apply(settings);
        Self { tuning, previous }
    }
}

impl Drop for ParallelConnectionGuard {
    fn drop(&mut self) {
        self.tuning.apply(self.previous);
    }
}
