//! Config for the tokio runtime the DML workers run on.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Blocking thread limit tokio uses when none is configured.
pub const DEFAULT_MAX_BLOCKING_THREADS: usize = 512;

/// Tokio runtime type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TokioRuntimeType {
    /// Current-thread runtime.
    CurrentThread,

    /// Multi-thread runtime.
    #[default]
    MultiThread,

    /// New, alternative multi-thread runtime.
    ///
    /// Requires `tokio_unstable` compile-time flag.
    MultiThreadAlt,
}

/// CLI config for the tokio worker runtime.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct TokioWorkerConfig {
    /// Set the maximum number of worker runtime threads to use.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(long = "num-threads", env = "BULKDML_NUM_THREADS", action)]
    pub num_threads: Option<NonZeroUsize>,

    /// Worker tokio runtime type.
    #[clap(
        long = "runtime-type",
        env = "BULKDML_RUNTIME_TYPE",
        default_value_t = TokioRuntimeType::default(),
        value_enum,
        action
    )]
    pub runtime_type: TokioRuntimeType,

    /// Specifies the limit for additional threads spawned by the worker runtime.
    #[clap(
        long = "runtime-max-blocking-threads",
        env = "BULKDML_RUNTIME_MAX_BLOCKING_THREADS",
        action
    )]
    pub max_blocking_threads: Option<NonZeroUsize>,

    /// Sets a custom timeout for a thread in the blocking pool of the worker runtime.
    #[clap(
        long = "runtime-thread-keep-alive",
        env = "BULKDML_RUNTIME_THREAD_KEEP_ALIVE",
        value_parser = humantime::parse_duration
    )]
    pub thread_keep_alive: Option<Duration>,
}

impl TokioWorkerConfig {
    /// Creates the tokio runtime builder.
    ///
    /// The blocking pool may grow to at least `min_blocking_threads` threads.
    pub fn builder(
        &self,
        min_blocking_threads: usize,
    ) -> Result<tokio::runtime::Builder, std::io::Error> {
        self.builder_with_name("worker", min_blocking_threads)
    }

    /// Creates the tokio runtime builder.
    pub fn builder_with_name(
        &self,
        name: &str,
        min_blocking_threads: usize,
    ) -> Result<tokio::runtime::Builder, std::io::Error> {
        // NOTE: no log macros will work here!
        //
        // The log emitter is initialised after the runtime is built, so use eprintln!() instead.

        let mut builder = match self.runtime_type {
            TokioRuntimeType::CurrentThread => tokio::runtime::Builder::new_current_thread(),
            TokioRuntimeType::MultiThread => tokio::runtime::Builder::new_multi_thread(),
            TokioRuntimeType::MultiThreadAlt => {
                #[cfg(tokio_unstable)]
                {
                    tokio::runtime::Builder::new_multi_thread_alt()
                }
                #[cfg(not(tokio_unstable))]
                {
                    return Err(std::io::Error::other(
                        "multi-thread-alt runtime requires `tokio_unstable`",
                    ));
                }
            }
        };

        builder.enable_time();
        builder.enable_io();

        let thread_counter = Arc::new(AtomicUsize::new(1));
        let name = name.to_owned();
        builder.thread_name_fn(move || {
            format!(
                "bulkdml {} {}",
                name,
                thread_counter.fetch_add(1, Ordering::SeqCst)
            )
        });

        let num_threads = match self.num_threads {
            None => std::thread::available_parallelism()?,
            Some(n) => n,
        };
        builder.worker_threads(num_threads.get());

        let max_blocking_threads = self
            .max_blocking_threads
            .map_or(DEFAULT_MAX_BLOCKING_THREADS, NonZeroUsize::get)
            .max(min_blocking_threads);
        builder.max_blocking_threads(max_blocking_threads);

        if let Some(x) = self.thread_keep_alive {
            builder.thread_keep_alive(x);
        }

        Ok(builder)
    }
}
