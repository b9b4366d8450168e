//! Errors raised while folding and executing DML.

use std::fmt::Display;

use crate::{operation::GenerateError, request::Fault, transport::TransportError};

/// Where a statement or hint appears in the query text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentLocation {
    /// 1-based line number
    pub line: u32,
    /// Offset of the fragment within the whole query text
    pub offset: usize,
    pub length: usize,
}

impl Display for FragmentLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, offset {}", self.line, self.offset)
    }
}

/// Errors raised while folding a DML plan, before anything is sent to the server
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("invalid hint '{hint}'{}: {suggestion}", at(location))]
    InvalidHint {
        hint: String,
        suggestion: &'static str,
        location: Option<FragmentLocation>,
    },

    #[error("unknown data source '{name}'{}", at(location))]
    UnknownDataSource {
        name: String,
        location: Option<FragmentLocation>,
    },

    #[error("unknown entity '{name}'{}", at(location))]
    UnknownEntity {
        name: String,
        location: Option<FragmentLocation>,
    },
}

fn at(location: &Option<FragmentLocation>) -> String {
    location.map(|l| format!(" at {l}")).unwrap_or_default()
}

/// Errors that abort the execution of a DML operation
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("operation failed: {0}")]
    Fault(#[source] Fault),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read source rows: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("source does not provide required column '{column}'")]
    MissingColumn { column: String },

    #[error("cannot generate request for row {row}: {source}")]
    RequestGeneration {
        row: usize,
        #[source]
        source: GenerateError,
    },

    #[error("unknown data source '{0}'")]
    UnknownDataSource(String),

    #[error("no data source is bound to the statement")]
    NoDataSource,

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("worker task failed: {0}")]
    WorkerPanicked(#[from] tokio::task::JoinError),
}

impl From<Fault> for ExecutionError {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl ExecutionError {
    /// The server fault behind this error, if it was caused by one
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault(f) => Some(f),
            _ => None,
        }
    }
}
