//! Query hints that influence how a DML statement is executed.
//!
//! Hints arrive as the string tokens of a `USE HINT (...)` list, compared case-insensitively:
//!
//! * `BATCH_SIZE_<n>`: send requests in envelopes of `n` (a positive integer)
//! * `BYPASS_CUSTOM_PLUGIN_EXECUTION`: ask the server to skip custom plugins
//! * `CONTINUE_ON_ERROR`: attempt every row even after a failure
//! * `NO_DIRECT_DML`: keep the row source as written instead of narrowing it to key columns
//!
//! A statement level `MAXDOP <n>` option caps the degree of parallelism.

use std::num::NonZeroUsize;

use crate::error::{CompileError, FragmentLocation};

pub const BATCH_SIZE_PREFIX: &str = "BATCH_SIZE_";
pub const BYPASS_CUSTOM_PLUGIN_EXECUTION: &str = "BYPASS_CUSTOM_PLUGIN_EXECUTION";
pub const CONTINUE_ON_ERROR: &str = "CONTINUE_ON_ERROR";
pub const NO_DIRECT_DML: &str = "NO_DIRECT_DML";

/// One token from a `USE HINT` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pub value: String,
    pub location: Option<FragmentLocation>,
}

impl Hint {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: FragmentLocation) -> Self {
        self.location = Some(location);
        self
    }

    fn is(&self, name: &str) -> bool {
        self.value.eq_ignore_ascii_case(name)
    }
}

/// The hints attached to a statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryHints {
    hints: Vec<Hint>,
    max_dop: Option<NonZeroUsize>,
}

impl QueryHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hint(mut self, hint: impl Into<Hint>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn with_max_dop(mut self, max_dop: NonZeroUsize) -> Self {
        self.max_dop = Some(max_dop);
        self
    }

    pub fn max_dop(&self) -> Option<NonZeroUsize> {
        self.max_dop
    }

    pub fn has(&self, name: &str) -> bool {
        self.hints.iter().any(|h| h.is(name))
    }

    pub fn continue_on_error(&self) -> bool {
        self.has(CONTINUE_ON_ERROR)
    }

    pub fn bypass_custom_plugin_execution(&self) -> bool {
        self.has(BYPASS_CUSTOM_PLUGIN_EXECUTION)
    }

    pub fn no_direct_dml(&self) -> bool {
        self.has(NO_DIRECT_DML)
    }

    /// The batch size requested by the first `BATCH_SIZE_n` hint, if any
    pub fn batch_size(&self) -> Result<Option<NonZeroUsize>, CompileError> {
        let Some(hint) = self.hints.iter().find(|h| {
            h.value
                .get(..BATCH_SIZE_PREFIX.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(BATCH_SIZE_PREFIX))
        }) else {
            return Ok(None);
        };

        hint.value[BATCH_SIZE_PREFIX.len()..]
            .parse::<NonZeroUsize>()
            .map(Some)
            .map_err(|_| CompileError::InvalidHint {
                hint: hint.value.clone(),
                suggestion: "BATCH_SIZE requires a positive integer value",
                location: hint.location,
            })
    }
}

impl From<&str> for Hint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Hint {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<H: Into<Hint>> FromIterator<H> for QueryHints {
    fn from_iter<T: IntoIterator<Item = H>>(iter: T) -> Self {
        Self {
            hints: iter.into_iter().map(Into::into).collect(),
            max_dop: None,
        }
    }
}
