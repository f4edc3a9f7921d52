#![forbid(unsafe_code)]

//! Row collapse and visibility.
//!
//! A collapsed row hides its descendants. Visibility is recomputed with
//! forward scans over the flat body: a row is visible iff none of its
//! ancestors is collapsed.
//!
//! Collapsing a whole level also applies to rows of that level loaded later.
//! Those are recognised by their keys, which are allocated monotonically.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use dgrid_core::{
    GridBus, GridDataSource, GridError, GridEvent, GridResult, GridRow, RowKey, RowKind, SharedGrid,
    SubscriptionScope,
};

#[derive(Debug, Default)]
struct CollapseState {
    levels: BTreeSet<usize>,
    /// Highest row key present after the last data update.
    seen: Option<RowKey>,
}

struct CollapseInner {
    grid: SharedGrid,
    bus: GridBus,
    source: Rc<dyn GridDataSource>,
    state: RefCell<CollapseState>,
}

fn collapsable(row: &GridRow, depth: usize) -> bool {
    !row.is_footer() && row.kind == RowKind::Stats && depth > row.level
}

impl CollapseInner {
    fn on_data_updated(&self) {
        let depth = self.source.breakdown_depth();
        let applied = {
            let mut state = self.state.borrow_mut();
            let mut grid = self.grid.borrow_mut();
            let seen = state.seen;
            let mut applied = 0;
            for row in &mut grid.body.rows {
                let fresh = seen.is_none_or(|seen| row.key > seen);
                if fresh && !row.collapsed && state.levels.contains(&row.level) && collapsable(row, depth) {
                    row.collapsed = true;
                    applied += 1;
                }
            }
            state.seen = grid.body.rows.iter().map(|r| r.key).max().max(seen);
            if applied > 0 {
                grid.body.refresh_visibility();
            }
            applied
        };
        if applied > 0 {
            tracing::debug!(rows = applied, "collapsed newly loaded rows");
            self.bus.emit(GridEvent::ExtCollapseUpdated);
        }
    }

    fn publish(&self) {
        self.bus.emit(GridEvent::DataUpdated);
        self.bus.emit(GridEvent::ExtCollapseUpdated);
    }
}

/// Collapse state of one grid.
pub struct CollapseExtension {
    inner: Rc<CollapseInner>,
    scope: SubscriptionScope,
}

impl fmt::Debug for CollapseExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollapseExtension")
            .field("state", &self.inner.state.borrow())
            .field("subscriptions", &self.scope.active_count())
            .finish()
    }
}

impl CollapseExtension {
    /// Attach to `grid`, listening on `bus` for as long as the extension lives.
    #[must_use]
    pub fn new(grid: SharedGrid, bus: GridBus, source: Rc<dyn GridDataSource>) -> Self {
        let inner = Rc::new(CollapseInner {
            grid,
            bus,
            source,
            state: RefCell::new(CollapseState::default()),
        });
        let scope = SubscriptionScope::new();
        let weak: Weak<CollapseInner> = Rc::downgrade(&inner);
        inner
            .bus
            .register(GridEvent::DataUpdated, Some(&scope), move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_data_updated();
                }
            });
        Self { inner, scope }
    }

    /// Whether `row` can be collapsed: not the footer, not a group or
    /// pagination row, and above the deepest configured level.
    #[must_use]
    pub fn is_row_collapsable(&self, row: &GridRow) -> bool {
        collapsable(row, self.inner.source.breakdown_depth())
    }

    #[must_use]
    pub fn is_row_collapsed(&self, key: RowKey) -> bool {
        self.inner
            .grid
            .borrow()
            .body
            .row(key)
            .is_some_and(|r| r.collapsed)
    }

    /// Whether rows of `level` are collapsed as a whole.
    #[must_use]
    pub fn is_level_collapsed(&self, level: usize) -> bool {
        self.inner.state.borrow().levels.contains(&level)
    }

    /// Collapse or expand one row.
    ///
    /// Returns `Ok(false)` when the row cannot collapse or already has the
    /// requested state; nothing is emitted then.
    pub fn set_row_collapsed(&self, key: RowKey, collapsed: bool) -> GridResult<bool> {
        let depth = self.inner.source.breakdown_depth();
        {
            let mut grid = self.inner.grid.borrow_mut();
            let Some(index) = grid.body.index_of(key) else {
                let is_footer = grid.footer.row.as_ref().is_some_and(|f| f.key == key);
                return if is_footer {
                    Ok(false)
                } else {
                    Err(GridError::UnknownRow(key))
                };
            };
            let row = &mut grid.body.rows[index];
            if row.collapsed == collapsed || !collapsable(row, depth) {
                return Ok(false);
            }
            row.collapsed = collapsed;
            let changed = grid.body.refresh_descendants(index);
            tracing::debug!(row = %key, collapsed, changed, "row collapse toggled");
        }
        self.inner.publish();
        Ok(true)
    }

    /// Collapse or expand every row of `level`, including rows loaded later.
    ///
    /// Returns the number of rows whose flag changed.
    pub fn set_level_collapsed(&self, level: usize, collapsed: bool) -> usize {
        let depth = self.inner.source.breakdown_depth();
        {
            let mut state = self.inner.state.borrow_mut();
            if collapsed {
                state.levels.insert(level);
            } else {
                state.levels.remove(&level);
            }
        }
        let changed = {
            let mut grid = self.inner.grid.borrow_mut();
            let mut changed = 0;
            for row in &mut grid.body.rows {
                if row.level == level && row.collapsed != collapsed && collapsable(row, depth) {
                    row.collapsed = collapsed;
                    changed += 1;
                }
            }
            grid.body.refresh_visibility();
            changed
        };
        tracing::debug!(level, collapsed, rows = changed, "level collapse toggled");
        self.inner.publish();
        changed
    }

    /// Keys of the rows not hidden by a collapsed ancestor, in body order.
    #[must_use]
    pub fn visible_rows(&self) -> Vec<RowKey> {
        self.inner
            .grid
            .borrow()
            .body
            .visible_rows()
            .map(|r| r.key)
            .collect()
    }
}
