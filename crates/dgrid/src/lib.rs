#![forbid(unsafe_code)]

//! Drill-down grid public facade crate.
//!
//! This crate provides the stable surface area for embedding the grid
//! engine. It re-exports common types from the internal crates, offers
//! [`GridApi`] to wire one grid instance, and a lightweight prelude.

use std::fmt;

mod api;

pub use api::GridApi;

// --- Core re-exports -------------------------------------------------------

pub use dgrid_core::{
    AllowAll, BreakdownId, Column, ColumnDef, Deregister, EventPayload, Grid, GridBus,
    GridDataSource, GridError, GridEvent, GridOptions, GridResult, GridRow, LoadOutcome, MetaData,
    NamedFilter, NodeRef, PermissionFlag, PermissionOracle, PreferenceStore, RowKey, RowKind,
    RowRef, SelectionOptions, SharedGrid, SortOrder, StaticPermissions, Stats, SubscriptionScope,
};

// --- Runtime re-exports ----------------------------------------------------

pub use dgrid_runtime::{
    AggregationEndpoint, BreakdownDataSource, DataSourceConfig, DateRange, MemoryStorage,
    NodePayload, PreferenceRegistry, RegistryPreferenceStore, RequestConfig, RowPayload,
    StorageBackend, StorageError,
};
#[cfg(feature = "state-persistence")]
pub use dgrid_runtime::FileStorage;

// --- Extension re-exports --------------------------------------------------

pub use dgrid_extensions::{
    CollapseExtension, ColumnsExtension, OrderExtension, Selection, SelectionExtension,
    SelectionKind,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type of the facade.
#[derive(Debug)]
pub enum Error {
    /// Grid operation failed.
    Grid(GridError),
    /// Preference storage failed.
    Storage(StorageError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grid(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Grid(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<GridError> for Error {
    fn from(err: GridError) -> Self {
        Self::Grid(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

/// Standard result type for facade APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        AggregationEndpoint, DataSourceConfig, Error, GridApi, GridEvent, GridOptions, GridRow,
        LoadOutcome, NodeRef, Result, RowKey, SelectionOptions, SortOrder,
    };

    pub use crate::{core, extensions, runtime};
}

pub use dgrid_core as core;
pub use dgrid_extensions as extensions;
pub use dgrid_runtime as runtime;
