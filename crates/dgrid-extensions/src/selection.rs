#![forbid(unsafe_code)]

//! Filter-based row selection.
//!
//! The selection is a filter predicate plus two exception lists relative to
//! it. A row matching the filter is selected unless listed in `unselected`;
//! any other row is selected only if listed in `selected`. "Select all" is
//! therefore a constant-time filter swap.
//!
//! # Reloads
//!
//! A full reload first publishes an empty body. The extension then marks a
//! restore as pending instead of clearing anything. On the next non-empty
//! body every exception entry is re-pointed at the new row carrying the same
//! breakdown id (the footer is matched as the level-0 row). Entries without a
//! match are dropped.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use dgrid_core::{
    Grid, GridBus, GridError, GridEvent, GridResult, GridRow, RowKey, RowKind, RowPredicate, RowRef,
    SelectionOptions, SharedGrid, SubscriptionScope,
};

/// Kind of the active selection filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionKind {
    /// Nothing matches.
    #[default]
    None,
    /// Everything matches.
    All,
    /// A caller-supplied predicate.
    Custom,
}

/// Snapshot of the selection state.
#[derive(Clone)]
pub struct Selection {
    pub kind: SelectionKind,
    pub filter: RowPredicate,
    /// Name of the configured filter in effect, if one was chosen by name.
    pub filter_name: Option<String>,
    /// Rows selected although the filter rejects them.
    pub selected: Vec<RowRef>,
    /// Rows unselected although the filter matches them.
    pub unselected: Vec<RowRef>,
}

impl Default for Selection {
    fn default() -> Self {
        Self::with_filter(SelectionKind::None, None)
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("kind", &self.kind)
            .field("filter_name", &self.filter_name)
            .field("selected", &self.selected)
            .field("unselected", &self.unselected)
            .finish_non_exhaustive()
    }
}

impl Selection {
    /// Empty exception lists under a fresh filter.
    ///
    /// `custom` is only consulted for [`SelectionKind::Custom`]; without it
    /// the custom filter matches nothing.
    #[must_use]
    pub fn with_filter(kind: SelectionKind, custom: Option<RowPredicate>) -> Self {
        let filter: RowPredicate = match (kind, custom) {
            (SelectionKind::All, _) => Rc::new(|_| true),
            (SelectionKind::Custom, Some(predicate)) => predicate,
            _ => Rc::new(|_| false),
        };
        Self {
            kind,
            filter,
            filter_name: None,
            selected: Vec::new(),
            unselected: Vec::new(),
        }
    }

    #[must_use]
    pub fn matches(&self, row: &GridRow) -> bool {
        (self.filter)(row)
    }

    /// Selection state of `row` by identity, ignoring configuration.
    #[must_use]
    pub fn is_selected(&self, row: &GridRow) -> bool {
        if self.matches(row) {
            !contains(&self.unselected, row.key)
        } else {
            contains(&self.selected, row.key)
        }
    }
}

fn contains(list: &[RowRef], key: RowKey) -> bool {
    list.iter().any(|r| r.key == key)
}

/// Rows the configuration allows to carry a selection at all.
fn eligible(options: &SelectionOptions, row: &GridRow) -> bool {
    row.kind != RowKind::Breakdown && options.is_level_enabled(row.level)
}

fn selected_in(options: &SelectionOptions, selection: &Selection, row: &GridRow) -> bool {
    eligible(options, row) && selection.is_selected(row)
}

/// The new-generation row standing for `old`.
fn rematch(grid: &Grid, old: &RowRef) -> Option<RowRef> {
    if old.level == 0 {
        return grid.footer.row.as_ref().map(GridRow::to_ref);
    }
    let id = old.id.as_ref()?;
    grid.body.find_by_id(id).map(GridRow::to_ref)
}

fn reconcile(grid: &Grid, list: &mut Vec<RowRef>) -> usize {
    let before = list.len();
    *list = list.iter().filter_map(|old| rematch(grid, old)).collect();
    before - list.len()
}

#[derive(Debug, Default)]
struct SelectionState {
    selection: Selection,
    pending_restore: bool,
}

struct SelectionInner {
    grid: SharedGrid,
    bus: GridBus,
    state: RefCell<SelectionState>,
}

impl SelectionInner {
    fn sync_flags(grid: &mut Grid, selection: &Selection) {
        let options = grid.meta.options.selection.clone();
        for row in grid.all_rows_mut() {
            row.selected = selected_in(&options, selection, row);
        }
    }

    fn on_data_updated(&self) {
        let restored = {
            let mut grid = self.grid.borrow_mut();
            let mut state = self.state.borrow_mut();
            if grid.body.is_empty() {
                if !state.pending_restore {
                    tracing::debug!("body cleared, selection restore pending");
                }
                state.pending_restore = true;
                None
            } else {
                let restored = if state.pending_restore {
                    state.pending_restore = false;
                    let selection = &mut state.selection;
                    Some(reconcile(&grid, &mut selection.selected) + reconcile(&grid, &mut selection.unselected))
                } else {
                    None
                };
                Self::sync_flags(&mut grid, &state.selection);
                restored
            }
        };
        if let Some(dropped) = restored {
            tracing::debug!(dropped, "selection restored after reload");
            self.bus.emit(GridEvent::ExtSelectionUpdated);
        }
    }

    fn replace(&self, selection: Selection) {
        {
            let mut grid = self.grid.borrow_mut();
            Self::sync_flags(&mut grid, &selection);
            tracing::debug!(kind = ?selection.kind, name = ?selection.filter_name, "selection filter set");
            self.state.borrow_mut().selection = selection;
        }
        self.bus.emit(GridEvent::ExtSelectionUpdated);
    }

    fn selectable(&self, grid: &Grid, row: &GridRow) -> bool {
        let options = &grid.meta.options.selection;
        if !eligible(options, row) {
            return false;
        }
        if !row.is_footer() {
            return true;
        }
        let state = self.state.borrow();
        let selection = &state.selection;
        if !selection.is_selected(row) {
            return true;
        }
        // Unselecting the footer must not leave an empty selection.
        grid.body.rows.iter().any(|r| selected_in(options, selection, r))
    }
}

/// Selection state of one grid.
pub struct SelectionExtension {
    inner: Rc<SelectionInner>,
    scope: SubscriptionScope,
}

impl fmt::Debug for SelectionExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionExtension")
            .field("state", &self.inner.state.borrow())
            .field("subscriptions", &self.scope.active_count())
            .finish()
    }
}

impl SelectionExtension {
    /// Attach to `grid`, listening on `bus` for as long as the extension lives.
    #[must_use]
    pub fn new(grid: SharedGrid, bus: GridBus) -> Self {
        let inner = Rc::new(SelectionInner {
            grid,
            bus,
            state: RefCell::new(SelectionState::default()),
        });
        let scope = SubscriptionScope::new();
        let weak: Weak<SelectionInner> = Rc::downgrade(&inner);
        inner
            .bus
            .register(GridEvent::DataUpdated, Some(&scope), move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_data_updated();
                }
            });
        Self { inner, scope }
    }

    /// Whether selection is enabled in the grid options.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.grid.borrow().meta.options.selection.enabled
    }

    /// Replace the filter and clear both exception lists.
    pub fn set_filter(&self, kind: SelectionKind, custom: Option<RowPredicate>) {
        self.inner.replace(Selection::with_filter(kind, custom));
    }

    /// Apply the configured filter called `name`. Returns `false` if no such
    /// filter is configured.
    pub fn set_named_filter(&self, name: &str) -> bool {
        let predicate = self
            .inner
            .grid
            .borrow()
            .meta
            .options
            .selection
            .filters
            .iter()
            .find(|f| f.name == name)
            .map(|f| Rc::clone(&f.predicate));
        let Some(predicate) = predicate else {
            tracing::debug!(name, "unknown selection filter");
            return false;
        };
        let mut selection = Selection::with_filter(SelectionKind::Custom, Some(predicate));
        selection.filter_name = Some(name.to_owned());
        self.inner.replace(selection);
        true
    }

    pub fn select_all(&self) {
        self.set_filter(SelectionKind::All, None);
    }

    pub fn select_none(&self) {
        self.set_filter(SelectionKind::None, None);
    }

    /// Snapshot of the current selection.
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.inner.state.borrow().selection.clone()
    }

    /// Replace the whole selection state.
    pub fn set_selection(&self, selection: Selection) {
        self.inner.replace(selection);
    }

    /// Whether a reload is in progress and the selection awaits its rows.
    #[must_use]
    pub fn is_restore_pending(&self) -> bool {
        self.inner.state.borrow().pending_restore
    }

    #[must_use]
    pub fn is_row_selected(&self, key: RowKey) -> bool {
        let grid = self.inner.grid.borrow();
        let state = self.inner.state.borrow();
        grid.row(key)
            .is_some_and(|row| selected_in(&grid.meta.options.selection, &state.selection, row))
    }

    /// Whether the user may change the selection of the row with `key`.
    #[must_use]
    pub fn is_row_selectable(&self, key: RowKey) -> bool {
        let grid = self.inner.grid.borrow();
        grid.row(key).is_some_and(|row| self.inner.selectable(&grid, row))
    }

    /// Select or unselect one row.
    ///
    /// Returns `Ok(false)` without notifying when the row already has the
    /// requested state or is not selectable.
    pub fn set_row_selection(&self, key: RowKey, selected: bool) -> GridResult<bool> {
        {
            let mut grid = self.inner.grid.borrow_mut();
            let Some(row) = grid.row(key) else {
                return Err(GridError::UnknownRow(key));
            };
            if !self.inner.selectable(&grid, row) {
                return Ok(false);
            }
            let mut state = self.inner.state.borrow_mut();
            let selection = &mut state.selection;
            if selection.is_selected(row) == selected {
                return Ok(false);
            }
            let list = if selection.matches(row) {
                &mut selection.unselected
            } else {
                &mut selection.selected
            };
            match list.iter().position(|r| r.key == key) {
                Some(pos) => {
                    list.remove(pos);
                }
                None => list.push(row.to_ref()),
            }
            drop(state);
            if let Some(row) = grid.row_mut(key) {
                row.selected = selected;
            }
            tracing::debug!(row = %key, selected, "row selection changed");
        }
        self.inner.bus.emit(GridEvent::ExtSelectionUpdated);
        Ok(true)
    }

    /// Keys of every selected loaded row, footer first.
    #[must_use]
    pub fn selected_rows(&self) -> Vec<RowKey> {
        let grid = self.inner.grid.borrow();
        let state = self.inner.state.borrow();
        let options = &grid.meta.options.selection;
        grid.all_rows()
            .filter(|row| selected_in(options, &state.selection, row))
            .map(|row| row.key)
            .collect()
    }
}
