//! Batched, parallel execution of bulk DML against a remote record store.
//!
//! A [`DmlNode`] is folded once at compile time ([`DmlNode::fold`]), which resolves its degree of
//! parallelism, batch size and flags from the [`Session`] and the statement's [`QueryHints`], and
//! then executed ([`DmlNode::execute`]). Execution materializes the source rows, turns each row
//! into one [`MutationRequest`] through the node's [`DmlOperation`], and sends the requests from a
//! bounded set of workers, one at a time or in multi-request envelopes, riding out server-side
//! throttling as it goes.

pub mod context;
pub mod error;
pub mod hints;
pub mod metadata;
pub mod operation;
pub mod plan;
pub mod progress;
pub mod request;
pub mod retry;
pub mod source;
pub mod transport;
pub mod value;

mod batch;
mod dispatch;

#[cfg(test)]
mod test_util;

pub use context::{
    DataSource, DmlResult, ExecutionContext, ExecutionOptions, ROWCOUNT_PARAMETER, Session,
    SessionOptions,
};
pub use dispatch::AFFINITY_ROW_THRESHOLD;
pub use error::{CompileError, ExecutionError, FragmentLocation};
pub use hints::{Hint, QueryHints};
pub use metadata::{EntityMetadata, InMemoryMetadataCache, MetadataCache};
pub use operation::{ColumnMapping, Delete, DmlOperation, Insert, Update, Upsert};
pub use plan::DmlNode;
pub use progress::{LogProgress, NoProgress, ProgressReporter};
pub use request::{
    BatchItem, BatchOutcome, ExecuteMultipleSettings, Fault, MutationOutcome, MutationRequest,
    MutationResponse, RequestKind,
};
pub use retry::{FaultClass, ThrottlePolicy};
pub use source::{ComputeScalar, ConstantScan, Expr, RowSource, ScanSource, SourceNode};
pub use transport::{
    ConnectionSettings, ConnectionTuning, ParallelConnectionGuard, SharedConnectionSettings,
    Transport, TransportError,
};
pub use value::{ColumnSchema, ColumnType, LogicalRow, Value};
