//! Config for the connection settings used while requests are sent in parallel.

use std::time::Duration;

use bulkdml_engine::{ConnectionSettings, ThrottlePolicy};

/// CLI config for parallel connection tuning and throttling.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct ConnectionTuningConfig {
    /// Maximum number of pooled connections per host while several workers are running.
    #[clap(
        long = "parallel-connection-limit",
        env = "BULKDML_PARALLEL_CONNECTION_LIMIT",
        default_value = "65000",
        action
    )]
    pub connection_limit: usize,

    /// Minimum number of threads kept available for blocking work while several workers are
    /// running.
    #[clap(
        long = "parallel-min-threads",
        env = "BULKDML_PARALLEL_MIN_THREADS",
        default_value = "100",
        action
    )]
    pub min_worker_threads: usize,

    /// Coalesce small packets before sending them while several workers are running.
    #[clap(
        long = "parallel-use-nagle",
        env = "BULKDML_PARALLEL_USE_NAGLE",
        action
    )]
    pub use_nagle: bool,

    /// How long to back off when the server throttles a request without saying for how long.
    #[clap(
        long = "default-retry-after",
        env = "BULKDML_DEFAULT_RETRY_AFTER",
        default_value = "2s",
        value_parser = humantime::parse_duration
    )]
    pub default_retry_after: Duration,
}

impl ConnectionTuningConfig {
    /// The settings applied for the duration of a parallel execution
    pub fn parallel_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connection_limit: self.connection_limit,
            min_worker_threads: self.min_worker_threads,
            use_nagle: self.use_nagle,
        }
    }

    pub fn throttle(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            default_retry_after: self.default_retry_after,
        }
    }
}
