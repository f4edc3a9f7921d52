#![forbid(unsafe_code)]

//! Drill-down grid core.
//!
//! # Key Components
//!
//! - [`Grid`] - Shared aggregate of header, body, footer and meta
//! - [`GridRow`] / [`Column`] - Rows of the flat tree and header columns
//! - [`GridBus`] - Per-grid publish/subscribe channel
//! - [`SubscriptionScope`] - Releases its registrations on drop
//! - [`PermissionFlag`] - Declarative `shown` flags evaluated by a [`PermissionOracle`]
//! - [`GridDataSource`] / [`PreferenceStore`] - Seams the extensions depend on
//!
//! # Role in the workspace
//! `dgrid-core` holds the shared vocabulary. `dgrid-runtime` fills the grid
//! from the aggregation endpoint, `dgrid-extensions` derives view state from
//! it, and `dgrid` wires one instance together.

pub mod column;
pub mod error;
pub mod event;
pub mod grid;
pub mod options;
pub mod permission;
pub mod preferences;
pub mod row;
pub mod source;

pub use column::{
    CHECKBOX_FIELD, Column, ColumnData, ColumnDef, ColumnExceptions, ColumnType, CustomException,
    SortOrder, format_order, parse_order,
};
pub use error::{EndpointError, GridError, GridResult, SaveError};
pub use event::{Deregister, EventPayload, GridBus, GridEvent, SubscriptionScope};
pub use grid::{Body, Footer, Grid, Header, Meta, MetaData, SharedGrid};
pub use options::{GridOptions, NamedFilter, RowPredicate, SelectionOptions};
pub use permission::{AllowAll, PermissionFlag, PermissionOracle, StaticPermissions};
pub use preferences::{NoopPreferences, PreferenceStore};
pub use row::{
    BreakdownId, GridRow, NodeInfo, NodeRef, Pagination, RowKey, RowKeyAllocator, RowKind,
    RowRef, Stats,
};
pub use source::{GridDataSource, LoadOutcome};
