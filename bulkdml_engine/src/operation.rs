//! The mutations a DML node can apply: how a row becomes a request, which faults count as
//! failures and what is done with the responses.

use std::{
    fmt::Debug,
    sync::atomic::{AtomicUsize, Ordering},
};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{
    metadata::EntityMetadata,
    request::{Fault, MutationRequest, MutationResponse, RequestKind},
    value::{LogicalRow, Value},
};

/// Error code returned when a create collides with a record that already exists
pub const DUPLICATE_RECORD_ERROR_CODE: i32 = -2147220937;

/// The verbs used to describe an operation in progress and result messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationNames {
    /// e.g. `Deleting`
    pub in_progress_uppercase: &'static str,
    /// e.g. `deleting`
    pub in_progress_lowercase: &'static str,
    /// e.g. `deleted`
    pub completed_lowercase: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("row has no value for column '{0}'")]
    MissingColumn(String),

    #[error("key column '{0}' is null")]
    NullKey(String),
}

/// One kind of mutation applied to every row of a DML node's source
pub trait DmlOperation: Debug + Send + Sync + 'static {
    fn names(&self) -> OperationNames;

    /// Logical name of the entity being changed
    fn entity(&self) -> &str;

    /// The source columns the operation reads
    fn required_columns(&self, metadata: &EntityMetadata) -> Vec<String>;

    /// Build the request for one row
    fn generate_request(
        &self,
        row: &LogicalRow,
        metadata: &EntityMetadata,
    ) -> Result<MutationRequest, GenerateError>;

    /// Whether `fault`, returned for `request`, is a real failure. Tolerated faults are still
    /// counted as errors but never stop the operation.
    fn filter_fault(&self, _request: &MutationRequest, _fault: &Fault) -> bool {
        true
    }

    /// Whether [`Self::handle_response`] should be given the successful responses
    fn wants_responses(&self) -> bool {
        false
    }

    fn handle_response(&self, _response: &MutationResponse) {}

    /// Forget whatever was collected from the responses of a previous execution. Called before
    /// the first request of every execution.
    fn reset(&self) {}

    /// Whether the source only has to supply the key columns of existing records
    fn folds_to_key_scan(&self) -> bool {
        false
    }
}

/// Maps entity attributes to the source columns their values are read from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping(IndexMap<String, String>);

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: impl Into<String>, column: impl Into<String>) -> Self {
        self.0.insert(attribute.into(), column.into());
        self
    }

    /// Map each attribute to a source column of the same name
    pub fn identity(attributes: impl IntoIterator<Item: Into<String>>) -> Self {
        Self(
            attributes
                .into_iter()
                .map(|a| {
                    let a = a.into();
                    (a.clone(), a)
                })
                .collect(),
        )
    }

    fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.values()
    }

    fn read<'a>(
        &'a self,
        row: &'a LogicalRow,
    ) -> impl Iterator<Item = Result<(&'a str, &'a Value), GenerateError>> + 'a {
        self.0.iter().map(|(attribute, column)| {
            row.get(column)
                .map(|v| (attribute.as_str(), v))
                .ok_or_else(|| GenerateError::MissingColumn(column.clone()))
        })
    }
}

fn key_values(
    row: &LogicalRow,
    keys: &[String],
    mut request: MutationRequest,
) -> Result<MutationRequest, GenerateError> {
    for key in keys {
        match row.get(key) {
            None => return Err(GenerateError::MissingColumn(key.clone())),
            Some(Value::Null) => return Err(GenerateError::NullKey(key.clone())),
            Some(value) => request = request.with_key(key.as_str(), value.clone()),
        }
    }
    Ok(request)
}

fn attribute_values(
    row: &LogicalRow,
    attributes: &ColumnMapping,
    skip_nulls: bool,
    mut request: MutationRequest,
) -> Result<MutationRequest, GenerateError> {
    for item in attributes.read(row) {
        let (attribute, value) = item?;
        if !(skip_nulls && value.is_null()) {
            request = request.with_attribute(attribute, value.clone());
        }
    }
    Ok(request)
}

/// Creates one record per row
#[derive(Debug)]
pub struct Insert {
    entity: String,
    attributes: ColumnMapping,
    created_ids: Mutex<Vec<Value>>,
}

impl Insert {
    pub fn new(entity: impl Into<String>, attributes: ColumnMapping) -> Self {
        Self {
            entity: entity.into(),
            attributes,
            created_ids: Default::default(),
        }
    }

    /// Ids of the records created so far, in the order their responses arrived
    pub fn created_ids(&self) -> Vec<Value> {
        self.created_ids.lock().clone()
    }
}

impl DmlOperation for Insert {
    fn names(&self) -> OperationNames {
        OperationNames {
            in_progress_uppercase: "Inserting",
            in_progress_lowercase: "inserting",
            completed_lowercase: "inserted",
        }
    }

    fn entity(&self) -> &str {
        &self.entity
    }

    fn required_columns(&self, _metadata: &EntityMetadata) -> Vec<String> {
        self.attributes.columns().cloned().collect()
    }

    fn generate_request(
        &self,
        row: &LogicalRow,
        _metadata: &EntityMetadata,
    ) -> Result<MutationRequest, GenerateError> {
        attribute_values(
            row,
            &self.attributes,
            true,
            MutationRequest::new(RequestKind::Create, &self.entity),
        )
    }

    fn wants_responses(&self) -> bool {
        true
    }

    fn handle_response(&self, response: &MutationResponse) {
        if let Some(id) = &response.id {
            self.created_ids.lock().push(id.clone());
        }
    }

    fn reset(&self) {
        self.created_ids.lock().clear();
    }
}

/// Updates existing records, addressed by primary key
#[derive(Debug)]
pub struct Update {
    entity: String,
    attributes: ColumnMapping,
}

impl Update {
    pub fn new(entity: impl Into<String>, attributes: ColumnMapping) -> Self {
        Self {
            entity: entity.into(),
            attributes,
        }
    }
}

impl DmlOperation for Update {
    fn names(&self) -> OperationNames {
        OperationNames {
            in_progress_uppercase: "Updating",
            in_progress_lowercase: "updating",
            completed_lowercase: "updated",
        }
    }

    fn entity(&self) -> &str {
        &self.entity
    }

    fn required_columns(&self, metadata: &EntityMetadata) -> Vec<String> {
        let mut columns = metadata.primary_key.clone();
        for column in self.attributes.columns() {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }

    fn generate_request(
        &self,
        row: &LogicalRow,
        metadata: &EntityMetadata,
    ) -> Result<MutationRequest, GenerateError> {
        let request = key_values(
            row,
            &metadata.primary_key,
            MutationRequest::new(RequestKind::Update, &self.entity),
        )?;
        attribute_values(row, &self.attributes, false, request)
    }

    fn folds_to_key_scan(&self) -> bool {
        true
    }
}

/// Deletes existing records, addressed by primary key
#[derive(Debug)]
pub struct Delete {
    entity: String,
}

impl Delete {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
        }
    }
}

impl DmlOperation for Delete {
    fn names(&self) -> OperationNames {
        OperationNames {
            in_progress_uppercase: "Deleting",
            in_progress_lowercase: "deleting",
            completed_lowercase: "deleted",
        }
    }

    fn entity(&self) -> &str {
        &self.entity
    }

    fn required_columns(&self, metadata: &EntityMetadata) -> Vec<String> {
        metadata.primary_key.clone()
    }

    fn generate_request(
        &self,
        row: &LogicalRow,
        metadata: &EntityMetadata,
    ) -> Result<MutationRequest, GenerateError> {
        key_values(
            row,
            &metadata.primary_key,
            MutationRequest::new(RequestKind::Delete, &self.entity),
        )
    }

    fn folds_to_key_scan(&self) -> bool {
        true
    }
}

/// Creates or updates records, addressed by primary key or by an alternate key
#[derive(Debug)]
pub struct Upsert {
    entity: String,
    alternate_key: Option<Vec<String>>,
    attributes: ColumnMapping,
    created: AtomicUsize,
    updated: AtomicUsize,
}

impl Upsert {
    pub fn new(entity: impl Into<String>, attributes: ColumnMapping) -> Self {
        Self {
            entity: entity.into(),
            alternate_key: None,
            attributes,
            created: AtomicUsize::new(0),
            updated: AtomicUsize::new(0),
        }
    }

    /// Match existing records on these columns instead of the primary key
    pub fn with_alternate_key(mut self, columns: impl IntoIterator<Item: Into<String>>) -> Self {
        self.alternate_key = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn updated_count(&self) -> usize {
        self.updated.load(Ordering::Relaxed)
    }

    fn keys<'a>(&'a self, metadata: &'a EntityMetadata) -> &'a [String] {
        self.alternate_key.as_deref().unwrap_or(&metadata.primary_key)
    }
}

impl DmlOperation for Upsert {
    fn names(&self) -> OperationNames {
        OperationNames {
            in_progress_uppercase: "Upserting",
            in_progress_lowercase: "upserting",
            completed_lowercase: "upserted",
        }
    }

    fn entity(&self) -> &str {
        &self.entity
    }

    fn required_columns(&self, metadata: &EntityMetadata) -> Vec<String> {
        let mut columns = self.keys(metadata).to_vec();
        for column in self.attributes.columns() {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }

    fn generate_request(
        &self,
        row: &LogicalRow,
        metadata: &EntityMetadata,
    ) -> Result<MutationRequest, GenerateError> {
        let request = key_values(
            row,
            self.keys(metadata),
            MutationRequest::new(RequestKind::Upsert, &self.entity),
        )?;
        attribute_values(row, &self.attributes, false, request)
    }

    fn filter_fault(&self, request: &MutationRequest, fault: &Fault) -> bool {
        // two upserts racing to create the same record, the loser's create is redundant
        !(request.kind == RequestKind::Upsert && fault.error_code == DUPLICATE_RECORD_ERROR_CODE)
    }

    fn wants_responses(&self) -> bool {
        true
    }

    fn handle_response(&self, response: &MutationResponse) {
        match response.created {
            Some(true) => self.created.fetch_add(1, Ordering::Relaxed),
            _ => self.updated.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn reset(&self) {
        self.created.store(0, Ordering::Relaxed);
        self.updated.store(0, Ordering::Relaxed);
    }
}
