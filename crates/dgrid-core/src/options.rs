#![forbid(unsafe_code)]

//! Per-instance grid configuration.

use std::fmt;
use std::rc::Rc;

use crate::row::GridRow;

/// Predicate deciding whether a row matches a selection filter.
pub type RowPredicate = Rc<dyn Fn(&GridRow) -> bool>;

/// A custom selection filter offered to the user by name.
#[derive(Clone)]
pub struct NamedFilter {
    /// Display and lookup name.
    pub name: String,
    /// Rows matched by the filter.
    pub predicate: RowPredicate,
}

impl NamedFilter {
    /// Create a named filter.
    pub fn new(name: impl Into<String>, predicate: impl Fn(&GridRow) -> bool + 'static) -> Self {
        Self {
            name: name.into(),
            predicate: Rc::new(predicate),
        }
    }
}

impl fmt::Debug for NamedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedFilter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Row-selection configuration.
///
/// Defaults: disabled, filters disabled, no selectable levels.
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    /// Whether rows can be selected at all.
    pub enabled: bool,
    /// Whether the "select by filter" menu is offered.
    pub filters_enabled: bool,
    /// Row levels that may be selected; level 0 enables the footer.
    pub levels: Vec<usize>,
    /// Custom filters offered by name.
    pub filters: Vec<NamedFilter>,
}

impl SelectionOptions {
    /// Enable selection on the given levels.
    #[must_use]
    pub fn enabled_for(levels: impl IntoIterator<Item = usize>) -> Self {
        Self {
            enabled: true,
            levels: levels.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Enable or disable the filter menu.
    #[must_use]
    pub fn filters_enabled(mut self, enabled: bool) -> Self {
        self.filters_enabled = enabled;
        self
    }

    /// Offer a custom filter.
    #[must_use]
    pub fn with_filter(mut self, filter: NamedFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Whether rows at `level` may be selected.
    #[must_use]
    pub fn is_level_enabled(&self, level: usize) -> bool {
        self.enabled && self.levels.contains(&level)
    }
}

/// Configuration of one grid instance.
#[derive(Debug, Clone)]
pub struct GridOptions {
    /// Namespace under which preferences are persisted.
    pub namespace: String,
    /// Row selection.
    pub selection: SelectionOptions,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            namespace: "grid".to_owned(),
            selection: SelectionOptions::default(),
        }
    }
}

impl GridOptions {
    /// Options for a grid persisted under `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Set the selection options.
    #[must_use]
    pub fn selection(mut self, selection: SelectionOptions) -> Self {
        self.selection = selection;
        self
    }
}
