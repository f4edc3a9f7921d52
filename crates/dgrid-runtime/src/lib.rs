#![forbid(unsafe_code)]

//! Drill-down grid runtime.
//!
//! # Key Components
//!
//! - [`BreakdownDataSource`] - Fetches, merges and flattens the breakdown tree
//! - [`AggregationEndpoint`] - Contract of the external aggregation service
//! - [`RequestTracker`] - Supersession of in-flight requests
//! - [`BreakdownTree`] - Nested node store with pagination and grouping
//! - [`RegistryPreferenceStore`] - Column and order preferences over a storage backend
//! - [`ScriptedEndpoint`] - Deterministic endpoint for tests
//!
//! # Role in the workspace
//! The runtime is the only writer of the grid's rows. Everything downstream
//! reacts to the `METADATA_UPDATED` and `DATA_UPDATED` events it emits.

pub mod data_source;
pub mod debug_trace;
pub mod endpoint;
pub mod request;
pub mod simulator;
pub mod state_persistence;
pub mod tree;

pub use data_source::{BreakdownDataSource, DataSourceConfig};
pub use endpoint::{
    AggregationEndpoint, DateRange, EndpointResult, GroupPayload, NodePayload, RequestConfig,
    RowPayload, UpdatedStatFragment,
};
pub use request::{RequestId, RequestTarget, RequestTracker};
pub use simulator::ScriptedEndpoint;
#[cfg(feature = "state-persistence")]
pub use state_persistence::FileStorage;
pub use state_persistence::{
    MemoryStorage, PreferenceEntry, PreferenceRegistry, RegistryPreferenceStore, StorageBackend,
    StorageError, StorageResult,
};
pub use tree::{BreakdownNode, BreakdownTree, DataRow, MergeOutcome};
