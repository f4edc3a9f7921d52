#![forbid(unsafe_code)]

//! Column availability and user visibility.
//!
//! Availability (`disabled`) depends on the entity level and the primary
//! breakdown and is recomputed on every metadata and data update. Stored
//! visibility is only loaded on metadata updates.
//!
//! Availability precedence per column:
//!
//! 1. a custom `(level, breakdown)` exception decides outright;
//! 2. otherwise a breakdown allow-list must contain the primary breakdown;
//! 3. otherwise the column is available.

use std::fmt;
use std::rc::{Rc, Weak};

use dgrid_core::{
    CHECKBOX_FIELD, Column, GridBus, GridDataSource, GridError, GridEvent, GridResult,
    PreferenceStore, SharedGrid, SubscriptionScope,
};

/// Whether `column` is available for `level` under `breakdown`.
#[must_use]
pub fn is_available(column: &Column, level: Option<&str>, breakdown: Option<&str>) -> bool {
    let exceptions = &column.data.exceptions;
    if let (Some(level), Some(breakdown)) = (level, breakdown)
        && let Some(custom) = exceptions
            .custom
            .iter()
            .find(|c| c.level == level && c.breakdown == breakdown)
    {
        return custom.shown;
    }
    match &exceptions.breakdowns {
        Some(allowed) => breakdown.is_some_and(|b| allowed.iter().any(|a| a == b)),
        None => true,
    }
}

struct ColumnsInner {
    grid: SharedGrid,
    bus: GridBus,
    source: Rc<dyn GridDataSource>,
    store: Rc<dyn PreferenceStore>,
}

impl ColumnsInner {
    /// Recompute `disabled`; returns how many columns changed.
    fn refresh_availability(&self) -> usize {
        let breakdown = self.source.primary_breakdown();
        let mut grid = self.grid.borrow_mut();
        let level = grid.level().map(str::to_owned);
        let mut changed = 0;
        for column in &mut grid.header.columns {
            let disabled = !is_available(column, level.as_deref(), breakdown.as_deref());
            if column.disabled != disabled {
                column.disabled = disabled;
                changed += 1;
            }
        }
        changed
    }

    fn on_metadata_updated(&self) {
        let loaded = self.store.load_columns(&mut self.grid.borrow_mut());
        let changed = self.refresh_availability();
        tracing::debug!(loaded, changed, "columns refreshed from metadata");
        self.bus.emit(GridEvent::ExtColumnsUpdated);
    }

    fn on_data_updated(&self) {
        let changed = self.refresh_availability();
        if changed > 0 {
            tracing::debug!(changed, "column availability changed");
            self.bus.emit(GridEvent::ExtColumnsUpdated);
        }
    }

    fn persist(&self) {
        self.store.save_columns(&self.grid.borrow());
        self.bus.emit(GridEvent::ExtColumnsUpdated);
    }
}

/// Column state of one grid.
pub struct ColumnsExtension {
    inner: Rc<ColumnsInner>,
    scope: SubscriptionScope,
}

impl fmt::Debug for ColumnsExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnsExtension")
            .field("columns", &self.inner.grid.borrow().header.columns.len())
            .field("subscriptions", &self.scope.active_count())
            .finish()
    }
}

impl ColumnsExtension {
    /// Attach to `grid`, listening on `bus` for as long as the extension lives.
    #[must_use]
    pub fn new(
        grid: SharedGrid,
        bus: GridBus,
        source: Rc<dyn GridDataSource>,
        store: Rc<dyn PreferenceStore>,
    ) -> Self {
        let inner = Rc::new(ColumnsInner {
            grid,
            bus,
            source,
            store,
        });
        let scope = SubscriptionScope::new();

        let weak: Weak<ColumnsInner> = Rc::downgrade(&inner);
        inner
            .bus
            .register(GridEvent::MetadataUpdated, Some(&scope), move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_metadata_updated();
                }
            });
        let weak: Weak<ColumnsInner> = Rc::downgrade(&inner);
        inner
            .bus
            .register(GridEvent::DataUpdated, Some(&scope), move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_data_updated();
                }
            });
        Self { inner, scope }
    }

    /// Columns to render, led by the checkbox column when selection is on.
    #[must_use]
    pub fn visible_columns(&self) -> Vec<Column> {
        let grid = self.inner.grid.borrow();
        let checkbox = grid
            .meta
            .options
            .selection
            .enabled
            .then(Column::checkbox);
        checkbox
            .into_iter()
            .chain(grid.header.columns.iter().filter(|c| c.is_displayed()).cloned())
            .collect()
    }

    /// Columns a column picker may offer, whatever their visibility.
    #[must_use]
    pub fn available_columns(&self) -> Vec<Column> {
        self.inner
            .grid
            .borrow()
            .header
            .columns
            .iter()
            .filter(|c| c.shown && !c.disabled)
            .cloned()
            .collect()
    }

    /// Visible columns the footer renders.
    #[must_use]
    pub fn footer_columns(&self) -> Vec<Column> {
        self.visible_columns()
            .into_iter()
            .filter(|c| c.field == CHECKBOX_FIELD || c.data.total_row)
            .collect()
    }

    /// Show or hide one column. Permanent columns ignore this.
    ///
    /// Returns whether the column changed; only then is it persisted and
    /// `EXT_COLUMNS_UPDATED` emitted.
    pub fn set_column_visibility(&self, field: &str, visible: bool) -> GridResult<bool> {
        {
            let mut grid = self.inner.grid.borrow_mut();
            let Some(column) = grid.header.column_mut(field) else {
                return Err(GridError::UnknownColumn(field.to_owned()));
            };
            if column.data.permanent || column.visible == visible {
                return Ok(false);
            }
            column.visible = visible;
        }
        tracing::debug!(field, visible, "column visibility set");
        self.inner.persist();
        Ok(true)
    }

    /// Make exactly `fields` visible, permanent columns aside.
    ///
    /// Returns the number of columns that changed. Nothing is persisted or
    /// emitted when that is zero.
    pub fn set_visible_columns<S: AsRef<str>>(&self, fields: &[S]) -> usize {
        let changed = {
            let mut grid = self.inner.grid.borrow_mut();
            let mut changed = 0;
            for column in &mut grid.header.columns {
                if column.data.permanent {
                    continue;
                }
                let visible = fields.iter().any(|f| f.as_ref() == column.field);
                if column.visible != visible {
                    column.visible = visible;
                    changed += 1;
                }
            }
            changed
        };
        if changed > 0 {
            tracing::debug!(changed, "visible columns replaced");
            self.inner.persist();
        }
        changed
    }
}
