#![forbid(unsafe_code)]

//! Error taxonomy shared by the grid crates.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | [`GridError::Endpoint`] | Transport or endpoint rejection | Propagated to caller, tree untouched |
//! | [`GridError::Save`] | Cell edit rejected by endpoint | Propagated with field errors, stats untouched |
//! | [`GridError::UnknownNode`] | Paging a node that is no longer in the tree | Propagated, no request issued |
//! | [`GridError::UnknownRow`] / [`GridError::UnknownColumn`] | Stale handle from the UI edge | Propagated, no mutation |
//! | [`GridError::NotInitialized`] | Operation needs metadata that was never loaded | Propagated |
//!
//! A superseded request is not an error; see `LoadOutcome::Superseded`.

use std::collections::BTreeMap;
use std::fmt;

use crate::row::{NodeRef, RowKey};

/// Failure reported by the aggregation endpoint while fetching data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// The request never produced a response (connection, timeout).
    Transport(String),
    /// The endpoint answered with a non-success status.
    Status {
        /// Status code reported by the endpoint.
        code: u16,
        /// Human-readable message.
        message: String,
    },
    /// The response could not be converted to the internal shape.
    Decode(String),
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::Transport(msg) => write!(f, "transport error: {msg}"),
            EndpointError::Status { code, message } => {
                write!(f, "endpoint returned status {code}: {message}")
            }
            EndpointError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for EndpointError {}

/// A rejected cell edit.
///
/// `field_errors` maps a stat field to the messages the endpoint attached to
/// it. The caller displays them and reverts its optimistic input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaveError {
    /// Summary message.
    pub message: String,
    /// Field-level validation messages.
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl SaveError {
    /// Create a save error with no field details.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }

    /// Attach a validation message to a field.
    #[must_use]
    pub fn with_field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Messages attached to `field`, if any.
    #[must_use]
    pub fn errors_for(&self, field: &str) -> &[String] {
        self.field_errors.get(field).map_or(&[], Vec::as_slice)
    }
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "save rejected: {}", self.message)?;
        if !self.field_errors.is_empty() {
            let fields: Vec<&str> = self.field_errors.keys().map(String::as_str).collect();
            write!(f, " (fields: {})", fields.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for SaveError {}

/// Top-level error for grid operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    /// Fetching metadata or rows failed.
    Endpoint(EndpointError),
    /// Persisting an edited value failed.
    Save(SaveError),
    /// The addressed breakdown node is not part of the current tree.
    UnknownNode(NodeRef),
    /// The addressed row is not part of the current grid.
    UnknownRow(RowKey),
    /// No column with this field exists in the header.
    UnknownColumn(String),
    /// Metadata has not been loaded yet.
    NotInitialized,
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::Endpoint(e) => write!(f, "{e}"),
            GridError::Save(e) => write!(f, "{e}"),
            GridError::UnknownNode(node) => write!(f, "unknown breakdown node: {node}"),
            GridError::UnknownRow(key) => write!(f, "unknown row: {key}"),
            GridError::UnknownColumn(field) => write!(f, "unknown column: {field}"),
            GridError::NotInitialized => write!(f, "grid metadata not loaded"),
        }
    }
}

impl std::error::Error for GridError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GridError::Endpoint(e) => Some(e),
            GridError::Save(e) => Some(e),
            GridError::UnknownNode(_)
            | GridError::UnknownRow(_)
            | GridError::UnknownColumn(_)
            | GridError::NotInitialized => None,
        }
    }
}

impl From<EndpointError> for GridError {
    fn from(e: EndpointError) -> Self {
        GridError::Endpoint(e)
    }
}

impl From<SaveError> for GridError {
    fn from(e: SaveError) -> Self {
        GridError::Save(e)
    }
}

/// Result type for grid operations.
pub type GridResult<T> = Result<T, GridError>;
