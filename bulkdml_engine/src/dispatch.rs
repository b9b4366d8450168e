//! Runs the requests of one DML statement across a bounded set of workers.
//!
//! Every worker is a tokio task owning its own connection handle and batch buffer
//! ([`WorkerState`]). Rows are not partitioned up front: workers claim the next unclaimed row
//! from a shared cursor, so a worker held up by throttling doesn't hold up the rows behind it.
//!
//! A worker stops claiming rows once the stop token is cancelled, which happens when the user
//! cancels the statement or when any worker fails. Requests already sent are allowed to finish,
//! and a worker that stops doesn't flush what is left in its batch buffer.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use observability_deps::tracing::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    batch::process_batch,
    context::ExecutionOptions,
    error::ExecutionError,
    metadata::EntityMetadata,
    operation::DmlOperation,
    progress::{ProgressMessages, ProgressReporter},
    request::{
        BYPASS_CUSTOM_PLUGIN_EXECUTION_PARAMETER, Fault, MutationOutcome, MutationRequest,
    },
    retry::ThrottlePolicy,
    transport::{ParallelConnectionGuard, Transport},
    value::LogicalRow,
};

/// Workloads of at least this many rows spread their cloned connections across server nodes
/// instead of pinning them to one
pub const AFFINITY_ROW_THRESHOLD: usize = 100;

/// Everything the dispatcher needs to know about the statement being executed
#[derive(Debug)]
pub(crate) struct DispatchPlan {
    pub(crate) operation: Arc<dyn DmlOperation>,
    pub(crate) metadata: Arc<EntityMetadata>,
    pub(crate) connection: Arc<dyn Transport>,
    pub(crate) max_dop: NonZeroUsize,
    pub(crate) batch_size: NonZeroUsize,
    pub(crate) bypass_custom_plugin_execution: bool,
    pub(crate) continue_on_error: bool,
}

/// The aggregate result of running every worker to completion
#[derive(Debug, Default)]
pub(crate) struct DispatchOutcome {
    pub(crate) succeeded: usize,
    pub(crate) errors: usize,
    /// The first tolerated fault, when continuing on error
    pub(crate) representative: Option<Fault>,
    /// The first error that stopped a worker
    pub(crate) error: Option<ExecutionError>,
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicUsize,
    errors: AtomicUsize,
    in_progress: AtomicUsize,
    threads: AtomicUsize,
    representative: Mutex<Option<Fault>>,
}

impl Counters {
    fn done(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed) + self.errors.load(Ordering::Relaxed)
    }
}

/// State owned by one worker task
#[derive(Debug)]
struct WorkerState {
    connection: Arc<dyn Transport>,
    batch: Vec<MutationRequest>,
}

#[derive(Debug)]
struct Shared {
    rows: Vec<LogicalRow>,
    cursor: AtomicUsize,
    counters: Counters,
    operation: Arc<dyn DmlOperation>,
    metadata: Arc<EntityMetadata>,
    batch_size: usize,
    bypass_custom_plugin_execution: bool,
    continue_on_error: bool,
    throttle: ThrottlePolicy,
    progress: Arc<dyn ProgressReporter>,
    stop: CancellationToken,
}

/// Execute the operation for every row
pub(crate) async fn dispatch(
    plan: DispatchPlan,
    rows: Vec<LogicalRow>,
    options: &ExecutionOptions,
) -> DispatchOutcome {
    plan.operation.reset();

    let total = rows.len();
    if total == 0 {
        return DispatchOutcome::default();
    }

    let max_dop = if plan.connection.can_parallelize() {
        plan.max_dop.get()
    } else {
        1
    };
    let workers = max_dop.min(total);
    let affinity = workers == 1 || total < AFFINITY_ROW_THRESHOLD;

    info!(
        entity = plan.operation.entity(),
        rows = total,
        workers,
        batch_size = plan.batch_size.get(),
        affinity,
        "executing DML"
    );

    // raised before the worker connections are cloned so the clones pick the settings up
    let _tuning = match &options.connection_tuning {
        Some(tuning) if workers > 1 => Some(ParallelConnectionGuard::acquire(
            Arc::clone(tuning),
            options.parallel_settings,
        )),
        _ => None,
    };

    let connections = if workers == 1 {
        vec![Arc::clone(&plan.connection)]
    } else {
        match (0..workers)
            .map(|_| plan.connection.clone_connection(affinity))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(connections) => connections,
            Err(e) => {
                return DispatchOutcome {
                    error: Some(e.into()),
                    ..Default::default()
                };
            }
        }
    };

    let shared = Arc::new(Shared {
        rows,
        cursor: AtomicUsize::new(0),
        counters: Counters::default(),
        operation: plan.operation,
        metadata: plan.metadata,
        batch_size: plan.batch_size.get(),
        bypass_custom_plugin_execution: plan.bypass_custom_plugin_execution,
        continue_on_error: plan.continue_on_error,
        throttle: options.throttle,
        progress: Arc::clone(&options.progress),
        stop: options.cancellation.child_token(),
    });

    let mut set = JoinSet::new();
    for connection in connections {
        let state = WorkerState {
            connection,
            batch: Vec::with_capacity(shared.batch_size.min(total)),
        };
        set.spawn(run_worker(Arc::clone(&shared), state));
    }

    let mut error = None;
    while let Some(result) = set.join_next().await {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                shared.stop.cancel();
                Err(ExecutionError::WorkerPanicked(e))
            }
        };

        if let Err(e) = result {
            if error.is_none() {
                error = Some(e);
            } else {
                debug!(%e, "additional worker error");
            }
        }
    }

    let counters = &shared.counters;
    DispatchOutcome {
        succeeded: counters.succeeded.load(Ordering::Relaxed),
        errors: counters.errors.load(Ordering::Relaxed),
        representative: counters.representative.lock().take(),
        error,
    }
}

async fn run_worker(shared: Arc<Shared>, mut state: WorkerState) -> Result<(), ExecutionError> {
    shared.counters.threads.fetch_add(1, Ordering::Relaxed);
    let result = shared.work(&mut state).await;
    shared.counters.threads.fetch_sub(1, Ordering::Relaxed);

    if let Err(e) = &result {
        warn!(%e, "DML worker failed, stopping remaining workers");
        shared.stop.cancel();
    }
    result
}

impl Shared {
    async fn work(&self, state: &mut WorkerState) -> Result<(), ExecutionError> {
        while !self.stop.is_cancelled() {
            let Some((index, row)) = self.claim() else {
                if !state.batch.is_empty() && !self.stop.is_cancelled() {
                    self.flush(state).await?;
                }
                return Ok(());
            };

            let request = self.generate(index, row)?;

            if self.batch_size == 1 {
                self.send(state.connection.as_ref(), request).await?;
            } else {
                state.batch.push(request);
                if state.batch.len() >= self.batch_size && !self.stop.is_cancelled() {
                    self.flush(state).await?;
                }
            }
        }

        debug!(unsent = state.batch.len(), "DML worker stopped");
        Ok(())
    }

    fn claim(&self) -> Option<(usize, &LogicalRow)> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.rows.get(index).map(|row| (index, row))
    }

    fn generate(&self, index: usize, row: &LogicalRow) -> Result<MutationRequest, ExecutionError> {
        let mut request = self
            .operation
            .generate_request(row, &self.metadata)
            .map_err(|source| ExecutionError::RequestGeneration { row: index, source })?;

        if self.bypass_custom_plugin_execution {
            request.set_parameter(BYPASS_CUSTOM_PLUGIN_EXECUTION_PARAMETER, true);
        }
        Ok(request)
    }

    fn messages(&self) -> ProgressMessages<'_> {
        ProgressMessages {
            names: self.operation.names(),
            entity: &self.metadata,
            total: self.rows.len(),
        }
    }

    async fn send(
        &self,
        connection: &dyn Transport,
        request: MutationRequest,
    ) -> Result<(), ExecutionError> {
        let counters = &self.counters;
        let in_progress = counters.in_progress.fetch_add(1, Ordering::Relaxed) + 1;
        let done = counters.done();
        let messages = self.messages();
        self.progress.report(
            messages.fraction(done),
            &messages.single(done, in_progress, counters.threads.load(Ordering::Relaxed)),
        );

        match self.throttle.execute(connection, &request).await? {
            MutationOutcome::Success(response) => {
                if self.operation.wants_responses() {
                    self.operation.handle_response(&response);
                }
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            MutationOutcome::Fault(fault) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                if self.operation.filter_fault(&request, &fault) {
                    self.record(fault)
                } else {
                    debug!(
                        error_code = fault.error_code,
                        message = %fault.message,
                        "fault tolerated"
                    );
                    Ok(())
                }
            }
        }
    }

    async fn flush(&self, state: &mut WorkerState) -> Result<(), ExecutionError> {
        let requests = std::mem::take(&mut state.batch);
        let counters = &self.counters;

        let done = counters.done();
        let first = done + 1;
        let last = counters
            .in_progress
            .fetch_add(requests.len(), Ordering::Relaxed)
            + requests.len();
        let messages = self.messages();
        self.progress.report(
            messages.fraction(done),
            &messages.batch(first, last, counters.threads.load(Ordering::Relaxed)),
        );

        let report = process_batch(
            state.connection.as_ref(),
            &requests,
            self.operation.as_ref(),
            &self.throttle,
        )
        .await?;

        counters
            .succeeded
            .fetch_add(report.succeeded, Ordering::Relaxed);
        counters
            .errors
            .fetch_add(report.faults.len(), Ordering::Relaxed);

        let failure = report.faults.into_iter().find_map(|fault| {
            let request = requests.get(fault.request_index?)?;
            self.operation
                .filter_fault(request, &fault)
                .then_some(fault)
        });
        match failure {
            Some(fault) => self.record(fault),
            None => Ok(()),
        }
    }

    /// Keep a fault that already counts as an error, or stop with it
    fn record(&self, fault: Fault) -> Result<(), ExecutionError> {
        if self.continue_on_error {
            self.counters.representative.lock().get_or_insert(fault);
            Ok(())
        } else {
            Err(ExecutionError::Fault(fault))
        }
    }
}
