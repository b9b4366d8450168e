//! Requests sent to the remote record store and the outcomes it returns.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Request parameter that asks the server to skip custom plugin logic
pub const BYPASS_CUSTOM_PLUGIN_EXECUTION_PARAMETER: &str = "BypassCustomPluginExecution";

/// The kind of mutation a [`MutationRequest`] performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Create,
    Update,
    Delete,
    Upsert,
}

/// A single mutation of one record, generated exactly once per source row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub kind: RequestKind,
    /// Logical name of the target entity
    pub entity: String,
    /// Values identifying the record, empty for a create
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub keys: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, Value>,
}

impl MutationRequest {
    pub fn new(kind: RequestKind, entity: impl Into<String>) -> Self {
        Self {
            kind,
            entity: entity.into(),
            keys: IndexMap::new(),
            attributes: IndexMap::new(),
            parameters: IndexMap::new(),
        }
    }

    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.parameters.insert(name.into(), value.into());
    }
}

/// The payload returned for a successful mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    /// Identifier of the record that was affected, when the server returns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// For upserts, whether a new record was created rather than an existing one updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
}

/// A structured failure reported by the server for one request or one envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{error_code}] {message}")]
pub struct Fault {
    pub error_code: i32,
    pub message: String,
    /// The raw `Retry-After` value supplied with a throttling fault
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
    /// Position of the failing request within its envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_index: Option<usize>,
}

impl Fault {
    pub fn new(error_code: i32, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            retry_after: None,
            request_index: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: impl Into<String>) -> Self {
        self.retry_after = Some(retry_after.into());
        self
    }

    pub fn with_request_index(mut self, index: usize) -> Self {
        self.request_index = Some(index);
        self
    }

    /// The server-declared delay before the request may be retried, if it is a whole number of
    /// seconds
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
            .as_deref()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// The result of sending one request
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Success(MutationResponse),
    Fault(Fault),
}

/// Options for a multi-request envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteMultipleSettings {
    /// Keep processing the remaining requests in the envelope after one of them fails
    pub continue_on_error: bool,
    /// Return a response for every successful request, not only the faults
    pub return_responses: bool,
}

/// The outcome of one request inside an envelope
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub request_index: usize,
    pub outcome: MutationOutcome,
}

/// The result of sending one multi-request envelope
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The envelope was processed; holds the faults and, if requested, the responses
    Items(Vec<BatchItem>),
    /// The envelope as a whole was rejected
    Fault(Fault),
}
