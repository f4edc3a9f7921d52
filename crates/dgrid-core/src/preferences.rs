#![forbid(unsafe_code)]

//! Persistence seam for user column and order choices.
//!
//! Calls are best effort: implementations swallow (and log) their own
//! failures, so nothing here returns a `Result`.

use crate::grid::Grid;

/// Reads and writes per-namespace column visibility and order.
pub trait PreferenceStore {
    /// Apply stored column visibility to `grid.header`.
    ///
    /// Returns `true` when a stored value was applied.
    fn load_columns(&self, grid: &mut Grid) -> bool;

    /// Store the visibility of every column in `grid.header`.
    fn save_columns(&self, grid: &Grid);

    /// Stored order string for this grid, if any.
    fn load_order(&self, grid: &Grid) -> Option<String>;

    /// Store the active order of `grid.header`.
    fn save_order(&self, grid: &Grid);
}

/// Store that remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreferences;

impl PreferenceStore for NoopPreferences {
    fn load_columns(&self, _grid: &mut Grid) -> bool {
        false
    }

    fn save_columns(&self, _grid: &Grid) {}

    fn load_order(&self, _grid: &Grid) -> Option<String> {
        None
    }

    fn save_order(&self, _grid: &Grid) {}
}
