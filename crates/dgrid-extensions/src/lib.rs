#![forbid(unsafe_code)]

//! View-state extensions of the drill-down grid.
//!
//! Each extension listens on the grid's bus through its own
//! [`SubscriptionScope`](dgrid_core::SubscriptionScope), derives its state
//! from `METADATA_UPDATED` / `DATA_UPDATED`, and announces changes with its
//! own `EXT_*_UPDATED` event. Extensions never call each other. Dropping an
//! extension releases its registrations.
//!
//! - [`CollapseExtension`] - Collapsed rows and row visibility
//! - [`SelectionExtension`] - Filter plus exception-list selection
//! - [`OrderExtension`] - Single active sort column
//! - [`ColumnsExtension`] - Column availability and user visibility

pub mod collapse;
pub mod columns;
pub mod order;
pub mod selection;

pub use collapse::CollapseExtension;
pub use columns::{ColumnsExtension, is_available};
pub use order::OrderExtension;
pub use selection::{Selection, SelectionExtension, SelectionKind};
