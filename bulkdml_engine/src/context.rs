//! The session a statement is compiled against and the context it is executed in.

use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::{
    metadata::MetadataCache,
    progress::{NoProgress, ProgressReporter},
    request::Fault,
    retry::ThrottlePolicy,
    transport::{ConnectionSettings, ConnectionTuning, Transport},
    value::Value,
};

/// Output parameter holding the number of records affected by the last statement
pub const ROWCOUNT_PARAMETER: &str = "@@ROWCOUNT";

pub const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(100).unwrap();
pub const DEFAULT_MAX_DEGREE_OF_PARALLELISM: NonZeroUsize = NonZeroUsize::new(10).unwrap();

/// A remote record store a statement can target
#[derive(Debug, Clone)]
pub struct DataSource {
    pub name: String,
    pub connection: Arc<dyn Transport>,
    pub metadata: Arc<dyn MetadataCache>,
}

/// Defaults that apply to every statement of a session unless a hint overrides them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub batch_size: NonZeroUsize,
    pub max_degree_of_parallelism: NonZeroUsize,
    pub bypass_custom_plugins: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_degree_of_parallelism: DEFAULT_MAX_DEGREE_OF_PARALLELISM,
            bypass_custom_plugins: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Session {
    data_sources: HashMap<String, DataSource>,
    pub options: SessionOptions,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            data_sources: HashMap::new(),
            options,
        }
    }

    pub fn with_data_source(mut self, data_source: DataSource) -> Self {
        self.data_sources
            .insert(data_source.name.to_lowercase(), data_source);
        self
    }

    /// Look up a data source by name, ignoring case
    pub fn data_source(&self, name: &str) -> Option<&DataSource> {
        self.data_sources.get(&name.to_lowercase())
    }
}

/// Collaborators used while a statement executes
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Cancelled by the user to stop the statement
    pub cancellation: CancellationToken,
    pub progress: Arc<dyn ProgressReporter>,
    /// Process-wide connection settings raised while several workers are running. Left alone
    /// when `None`.
    pub connection_tuning: Option<Arc<dyn ConnectionTuning>>,
    pub parallel_settings: ConnectionSettings,
    pub throttle: ThrottlePolicy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            progress: Arc::new(NoProgress),
            connection_tuning: None,
            parallel_settings: ConnectionSettings::PARALLEL,
            throttle: ThrottlePolicy::default(),
        }
    }
}

/// State shared by the statements of one batch of queries
#[derive(Debug)]
pub struct ExecutionContext {
    pub session: Arc<Session>,
    pub options: ExecutionOptions,
    parameter_values: IndexMap<String, Value>,
    messages: Vec<String>,
}

impl ExecutionContext {
    pub fn new(session: Arc<Session>, options: ExecutionOptions) -> Self {
        Self {
            session,
            options,
            parameter_values: IndexMap::new(),
            messages: vec![],
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameter_values.get(name)
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.parameter_values.insert(name.into(), value.into());
    }

    /// `@@ROWCOUNT` as set by the last statement
    pub fn row_count(&self) -> Option<i64> {
        match self.parameter(ROWCOUNT_PARAMETER) {
            Some(Value::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    /// Add a message to the log shown to the user alongside the results
    pub fn log(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

/// The outcome of a DML statement that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct DmlResult {
    pub records_affected: usize,
    pub error_count: usize,
    /// e.g. `(250 accounts deleted)`
    pub message: String,
    /// A fault that was tolerated because the statement was told to continue on error
    pub warning: Option<Fault>,
}
