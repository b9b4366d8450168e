//! The DML node of an execution plan: folding it at compile time and executing it.

use std::{num::NonZeroUsize, sync::Arc};

use futures::TryStreamExt;
use observability_deps::tracing::{info, warn};

use crate::{
    context::{DmlResult, ExecutionContext, ROWCOUNT_PARAMETER, Session},
    dispatch::{DispatchPlan, dispatch},
    error::{CompileError, ExecutionError, FragmentLocation},
    hints::QueryHints,
    metadata::EntityMetadata,
    operation::DmlOperation,
    progress::ProgressMessages,
    source::{ComputeScalar, SourceNode},
    transport::Transport,
    value::LogicalRow,
};

/// Applies a [`DmlOperation`] to every row produced by its source
#[derive(Debug, Clone)]
pub struct DmlNode {
    pub operation: Arc<dyn DmlOperation>,
    /// Name of the data source holding the entity, `None` when the statement isn't bound to one
    pub data_source: Option<String>,
    pub source: SourceNode,
    pub max_dop: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub bypass_custom_plugin_execution: bool,
    pub continue_on_error: bool,
    /// Where the statement appears in the query text
    pub location: Option<FragmentLocation>,
}

impl DmlNode {
    pub fn new(operation: Arc<dyn DmlOperation>, source: SourceNode) -> Self {
        Self {
            operation,
            data_source: None,
            source,
            max_dop: NonZeroUsize::MIN,
            batch_size: NonZeroUsize::MIN,
            bypass_custom_plugin_execution: false,
            continue_on_error: false,
            location: None,
        }
    }

    pub fn with_data_source(mut self, name: impl Into<String>) -> Self {
        self.data_source = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: FragmentLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Resolve the execution settings of this node from the session and the statement's hints,
    /// and narrow its source to the columns the operation reads
    ///
    /// Folding a folded node again with the same session and hints changes nothing.
    pub fn fold(self, session: &Session, hints: &QueryHints) -> Result<Self, CompileError> {
        let source = self.source.fold(hints);

        let data_source = match &self.data_source {
            None => None,
            Some(name) => Some(session.data_source(name).ok_or_else(|| {
                CompileError::UnknownDataSource {
                    name: name.clone(),
                    location: self.location,
                }
            })?),
        };

        let max_dop = match data_source {
            None => NonZeroUsize::MIN,
            Some(ds) => effective_max_dop(
                hints
                    .max_dop()
                    .unwrap_or(session.options.max_degree_of_parallelism),
                ds.connection.as_ref(),
            ),
        };

        let batch_size = hints
            .batch_size()
            .map_err(|e| match e {
                CompileError::InvalidHint {
                    hint,
                    suggestion,
                    location,
                } => CompileError::InvalidHint {
                    hint,
                    suggestion,
                    location: location.or(self.location),
                },
                e => e,
            })?
            .unwrap_or(session.options.batch_size);

        let source = match data_source {
            None => source,
            Some(ds) => {
                let entity = self.operation.entity();
                let metadata =
                    ds.metadata
                        .entity(entity)
                        .ok_or_else(|| CompileError::UnknownEntity {
                            name: entity.to_owned(),
                            location: self.location,
                        })?;
                fold_key_scan(source, self.operation.as_ref(), &metadata, hints)
            }
        };

        Ok(Self {
            source,
            max_dop,
            batch_size,
            bypass_custom_plugin_execution: hints.bypass_custom_plugin_execution()
                || session.options.bypass_custom_plugins,
            continue_on_error: hints.continue_on_error(),
            ..self
        })
    }

    /// Run the operation against every source row
    ///
    /// `@@ROWCOUNT` is set to the number of records changed whether or not the statement
    /// succeeds.
    pub async fn execute(
        &self,
        context: &mut ExecutionContext,
    ) -> Result<DmlResult, ExecutionError> {
        let mut records_affected = 0;
        let result = self.execute_rows(context, &mut records_affected).await;
        context.set_parameter(
            ROWCOUNT_PARAMETER,
            i64::try_from(records_affected).unwrap_or(i64::MAX),
        );
        result
    }

    async fn execute_rows(
        &self,
        context: &mut ExecutionContext,
        records_affected: &mut usize,
    ) -> Result<DmlResult, ExecutionError> {
        let name = self
            .data_source
            .as_deref()
            .ok_or(ExecutionError::NoDataSource)?;
        let data_source = context
            .session
            .data_source(name)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownDataSource(name.to_owned()))?;
        let entity = self.operation.entity();
        let metadata = data_source
            .metadata
            .entity(entity)
            .ok_or_else(|| ExecutionError::UnknownEntity(entity.to_owned()))?;

        let schema = self.source.schema();
        if let Some(column) = self
            .operation
            .required_columns(&metadata)
            .into_iter()
            .find(|c| !schema.contains(c))
        {
            return Err(ExecutionError::MissingColumn { column });
        }

        let rows: Vec<LogicalRow> = self
            .source
            .execute()
            .try_collect()
            .await
            .map_err(ExecutionError::Source)?;
        let total = rows.len();

        let plan = DispatchPlan {
            operation: Arc::clone(&self.operation),
            metadata: Arc::clone(&metadata),
            connection: Arc::clone(&data_source.connection),
            max_dop: self.max_dop,
            batch_size: self.batch_size,
            bypass_custom_plugin_execution: self.bypass_custom_plugin_execution,
            continue_on_error: self.continue_on_error,
        };
        let outcome = dispatch(plan, rows, &context.options).await;
        *records_affected = outcome.succeeded;

        let messages = ProgressMessages {
            names: self.operation.names(),
            entity: &metadata,
            total,
        };

        // a cancellation that arrives after the last row was answered doesn't fail the statement
        let processed = outcome.succeeded + outcome.errors;
        let failure = match outcome.error {
            Some(e) => Some(e),
            None if processed < total && context.options.cancellation.is_cancelled() => {
                Some(ExecutionError::Cancelled)
            }
            None => None,
        };
        if let Some(e) = failure {
            warn!(entity, %e, "{}", messages.stopped(processed));
            if outcome.succeeded > 0 {
                let partial = messages.partial(outcome.succeeded);
                info!(
                    entity,
                    succeeded = outcome.succeeded,
                    errors = outcome.errors,
                    "{partial}"
                );
                context.log(partial);
            }
            return Err(e);
        }

        if let Some(fault) = &outcome.representative {
            warn!(
                entity,
                errors = outcome.errors,
                error_code = fault.error_code,
                message = %fault.message,
                "DML completed with errors"
            );
            context.log(messages.partial(outcome.succeeded));
            context.log(fault.to_string());
        }

        let message = messages.completed(outcome.succeeded);
        info!(entity, errors = outcome.errors, "{message}");

        Ok(DmlResult {
            records_affected: outcome.succeeded,
            error_count: outcome.errors,
            message,
            warning: outcome.representative,
        })
    }
}

/// The degree of parallelism a connection can take, up to `configured`
fn effective_max_dop(configured: NonZeroUsize, connection: &dyn Transport) -> NonZeroUsize {
    if !connection.can_parallelize() {
        return NonZeroUsize::MIN;
    }
    match connection.recommended_parallelism() {
        Some(recommended) => configured.min(recommended),
        None => configured,
    }
}

/// Narrow a scan of the target entity to the key columns (plus anything else the operation
/// reads), so only the identifiers of the records to change are retrieved
fn fold_key_scan(
    source: SourceNode,
    operation: &dyn DmlOperation,
    metadata: &EntityMetadata,
    hints: &QueryHints,
) -> SourceNode {
    if !operation.folds_to_key_scan() || hints.no_direct_dml() || metadata.polymorphic_base {
        return source;
    }

    let entity = operation.entity();
    let keys = &metadata.primary_key;
    let mut required = operation.required_columns(metadata);

    match source {
        SourceNode::Scan(scan) => match scan.fold_dml_source(entity, &required, keys) {
            Some(folded) => SourceNode::Scan(folded),
            None => SourceNode::Scan(scan),
        },
        SourceNode::Compute(compute) => {
            let folded = match compute.source.as_ref() {
                // computed values can only be kept if they are derived from the keys alone
                SourceNode::Scan(scan)
                    if compute
                        .referenced_columns()
                        .into_iter()
                        .all(|c| keys.iter().any(|k| k == c)) =>
                {
                    required.retain(|c| !compute.columns.contains_key(c));
                    scan.fold_dml_source(entity, &required, keys)
                }
                _ => None,
            };

            match folded {
                Some(folded) => SourceNode::Compute(ComputeScalar {
                    columns: compute.columns,
                    source: Box::new(SourceNode::Scan(folded)),
                }),
                None => SourceNode::Compute(compute),
            }
        }
        opaque @ SourceNode::Opaque(_) => opaque,
    }
}
