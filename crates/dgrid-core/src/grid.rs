#![forbid(unsafe_code)]

//! The shared grid aggregate: header, body, footer and meta.
//!
//! # Design Invariants
//!
//! 1. **Flat tree**: `Body::rows` is depth-ordered. Walking forward from a row
//!    until a row with level <= the start level is found yields exactly the
//!    start row's descendants.
//! 2. **Single footer**: the level-0 row lives in `Footer`, never in `Body`.
//! 3. **Single writer**: only the data source replaces rows; extensions only
//!    flip per-row and per-column flags.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use serde::Deserialize;

use crate::column::{Column, ColumnDef, SortOrder, format_order};
use crate::options::GridOptions;
use crate::row::{BreakdownId, GridRow, RowKey};

/// Grid handle shared by the data source and the extensions.
pub type SharedGrid = Rc<RefCell<Grid>>;

/// Metadata returned by the aggregation endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaData {
    /// Entity level the grid shows (e.g. `"campaigns"`).
    #[serde(default)]
    pub level: String,
    /// Column catalog.
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

/// Header: the ordered column list.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub columns: Vec<Column>,
}

impl Header {
    /// Look up a column by field.
    #[must_use]
    pub fn column(&self, field: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Mutable lookup by field.
    pub fn column_mut(&mut self, field: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.field == field)
    }

    /// Signed order string of the ordered column, if any.
    #[must_use]
    pub fn active_order(&self) -> Option<String> {
        self.columns
            .iter()
            .find(|c| c.order.is_active())
            .and_then(|c| format_order(c.order_key(), c.order))
    }

    /// Number of columns with a non-`None` order.
    #[must_use]
    pub fn ordered_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| c.order != SortOrder::None)
            .count()
    }
}

/// Body: the flat, depth-ordered row list.
#[derive(Debug, Clone, Default)]
pub struct Body {
    pub rows: Vec<GridRow>,
}

impl Body {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the body has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the row with `key`.
    #[must_use]
    pub fn index_of(&self, key: RowKey) -> Option<usize> {
        self.rows.iter().position(|r| r.key == key)
    }

    /// Row with `key`.
    #[must_use]
    pub fn row(&self, key: RowKey) -> Option<&GridRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    /// Mutable row with `key`.
    pub fn row_mut(&mut self, key: RowKey) -> Option<&mut GridRow> {
        self.rows.iter_mut().find(|r| r.key == key)
    }

    /// First row carrying the stable id `id`.
    #[must_use]
    pub fn find_by_id(&self, id: &BreakdownId) -> Option<&GridRow> {
        self.rows.iter().find(|r| r.id.as_ref() == Some(id))
    }

    /// Index range of the descendants of the row at `index`.
    ///
    /// Bounded forward scan; empty when `index` is out of bounds.
    #[must_use]
    pub fn descendant_range(&self, index: usize) -> Range<usize> {
        let Some(start) = self.rows.get(index) else {
            return index..index;
        };
        let end = self.rows[index + 1..]
            .iter()
            .position(|r| r.level <= start.level)
            .map_or(self.rows.len(), |offset| index + 1 + offset);
        index + 1..end
    }

    /// Indices of the direct children of the row at `index`.
    #[must_use]
    pub fn children(&self, index: usize) -> Vec<usize> {
        let Some(row) = self.rows.get(index) else {
            return Vec::new();
        };
        self.descendant_range(index)
            .filter(|&i| self.rows[i].parent == Some(row.key))
            .collect()
    }

    /// Index of the parent of the row at `index`.
    #[must_use]
    pub fn parent_index(&self, index: usize) -> Option<usize> {
        let parent = self.rows.get(index)?.parent?;
        self.rows[..index].iter().rposition(|r| r.key == parent)
    }

    /// Rows not hidden by a collapsed ancestor.
    pub fn visible_rows(&self) -> impl Iterator<Item = &GridRow> {
        self.rows.iter().filter(|r| r.visible)
    }

    /// Recompute `visible` for every row from the `collapsed` flags.
    pub fn refresh_visibility(&mut self) {
        // (level, hides descendants) of the open ancestors.
        let mut ancestors: Vec<(usize, bool)> = Vec::new();
        for row in &mut self.rows {
            while ancestors.last().is_some_and(|&(level, _)| level >= row.level) {
                ancestors.pop();
            }
            let hidden = ancestors.last().is_some_and(|&(_, hides)| hides);
            row.visible = !hidden;
            ancestors.push((row.level, hidden || row.collapsed));
        }
    }

    /// Recompute `visible` for the descendants of the row at `index`.
    ///
    /// Returns how many rows changed visibility.
    pub fn refresh_descendants(&mut self, index: usize) -> usize {
        let range = self.descendant_range(index);
        let Some(start) = self.rows.get(index) else {
            return 0;
        };
        let mut ancestors = vec![(start.level, !start.visible || start.collapsed)];
        let mut changed = 0;
        for row in &mut self.rows[range] {
            while ancestors.last().is_some_and(|&(level, _)| level >= row.level) {
                ancestors.pop();
            }
            let hidden = ancestors.last().is_some_and(|&(_, hides)| hides);
            if row.visible == hidden {
                changed += 1;
            }
            row.visible = !hidden;
            ancestors.push((row.level, hidden || row.collapsed));
        }
        changed
    }
}

/// Footer: the single totals row.
#[derive(Debug, Clone, Default)]
pub struct Footer {
    pub row: Option<GridRow>,
}

/// Meta: options, loaded metadata and lifecycle flags.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    /// Instance configuration.
    pub options: GridOptions,
    /// Last metadata loaded by the data source.
    pub data: Option<MetaData>,
    /// Metadata has been loaded at least once.
    pub initialized: bool,
    /// A data request is outstanding.
    pub loading: bool,
}

/// Root aggregate of one grid instance.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    pub header: Header,
    pub body: Body,
    pub footer: Footer,
    pub meta: Meta,
}

impl Grid {
    /// Create an empty grid.
    #[must_use]
    pub fn new(options: GridOptions) -> Self {
        Self {
            meta: Meta {
                options,
                ..Meta::default()
            },
            ..Self::default()
        }
    }

    /// Wrap in `Rc<RefCell<_>>` for sharing between components.
    #[must_use]
    pub fn shared(self) -> SharedGrid {
        Rc::new(RefCell::new(self))
    }

    /// Row with `key`, footer included.
    #[must_use]
    pub fn row(&self, key: RowKey) -> Option<&GridRow> {
        match &self.footer.row {
            Some(footer) if footer.key == key => Some(footer),
            _ => self.body.row(key),
        }
    }

    /// Mutable row with `key`, footer included.
    pub fn row_mut(&mut self, key: RowKey) -> Option<&mut GridRow> {
        match &mut self.footer.row {
            Some(footer) if footer.key == key => Some(footer),
            _ => self.body.row_mut(key),
        }
    }

    /// Footer followed by every body row.
    pub fn all_rows(&self) -> impl Iterator<Item = &GridRow> {
        self.footer.row.iter().chain(self.body.rows.iter())
    }

    /// Mutable footer followed by every body row.
    pub fn all_rows_mut(&mut self) -> impl Iterator<Item = &mut GridRow> {
        self.footer.row.iter_mut().chain(self.body.rows.iter_mut())
    }

    /// Entity level from the loaded metadata.
    #[must_use]
    pub fn level(&self) -> Option<&str> {
        self.meta.data.as_ref().map(|m| m.level.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Stats;

    fn row(key: u64, level: usize, parent: Option<u64>) -> GridRow {
        GridRow::new(RowKey::new(key), Some(BreakdownId::new(key.to_string())), level)
            .with_parent(parent.map(RowKey::new))
    }

    /// 1
    /// ├─ 2
    /// │  └─ 3
    /// └─ 4
    /// 5
    fn body() -> Body {
        Body {
            rows: vec![
                row(1, 1, None),
                row(2, 2, Some(1)),
                row(3, 3, Some(2)),
                row(4, 2, Some(1)),
                row(5, 1, None),
            ],
        }
    }

    #[test]
    fn descendant_range_stops_at_same_level() {
        let b = body();
        assert_eq!(b.descendant_range(0), 1..4);
        assert_eq!(b.descendant_range(1), 2..3);
        assert_eq!(b.descendant_range(4), 5..5);
        assert_eq!(b.descendant_range(99), 99..99);
    }

    #[test]
    fn children_and_parent() {
        let b = body();
        assert_eq!(b.children(0), vec![1, 3]);
        assert_eq!(b.parent_index(2), Some(1));
        assert_eq!(b.parent_index(0), None);
    }

    #[test]
    fn visibility_follows_collapsed_ancestors() {
        let mut b = body();
        b.rows[1].collapsed = true;
        b.refresh_visibility();
        let visible: Vec<bool> = b.rows.iter().map(|r| r.visible).collect();
        assert_eq!(visible, vec![true, true, false, true, true]);

        b.rows[0].collapsed = true;
        assert_eq!(b.refresh_descendants(0), 2);
        let visible: Vec<bool> = b.rows.iter().map(|r| r.visible).collect();
        assert_eq!(visible, vec![true, false, false, false, true]);

        b.rows[0].collapsed = false;
        b.refresh_descendants(0);
        let visible: Vec<bool> = b.rows.iter().map(|r| r.visible).collect();
        assert_eq!(visible, vec![true, true, false, true, true]);
    }

    #[test]
    fn grid_row_lookup_includes_footer() {
        let mut grid = Grid::new(GridOptions::default());
        grid.body = body();
        grid.footer.row = Some(GridRow::footer(RowKey::new(100), Stats::new()));
        assert!(grid.row(RowKey::new(100)).is_some_and(GridRow::is_footer));
        assert_eq!(grid.all_rows().count(), 6);
        grid.row_mut(RowKey::new(3)).unwrap().collapsed = true;
        assert!(grid.body.rows[2].collapsed);
    }

    #[test]
    fn active_order_uses_order_field() {
        use crate::column::{Column, ColumnDef};
        use crate::permission::AllowAll;

        let mut def = ColumnDef::new("name");
        def.order_field = Some("breakdown_name".into());
        let mut header = Header {
            columns: vec![
                Column::from_def(&def, &AllowAll),
                Column::from_def(&ColumnDef::new("cpc"), &AllowAll),
            ],
        };
        assert_eq!(header.active_order(), None);
        header.columns[0].order = SortOrder::Desc;
        assert_eq!(header.active_order().as_deref(), Some("-breakdown_name"));
        assert_eq!(header.ordered_count(), 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        /// Depth-ordered level sequences: each level is at most one deeper
        /// than its predecessor.
        fn levels() -> impl Strategy<Value = Vec<usize>> {
            prop::collection::vec(0usize..3, 1..40).prop_map(|steps| {
                let mut out = Vec::with_capacity(steps.len());
                let mut prev = 0usize;
                for step in steps {
                    let level = match step {
                        0 => prev + 1,
                        1 => prev.max(1),
                        _ => prev.saturating_sub(1).max(1),
                    };
                    out.push(level);
                    prev = level;
                }
                out
            })
        }

        proptest! {
            #[test]
            fn descendant_range_is_the_deeper_run(levels in levels(), pick in any::<prop::sample::Index>()) {
                let body = Body {
                    rows: levels
                        .iter()
                        .enumerate()
                        .map(|(i, &l)| GridRow::new(RowKey::new(i as u64), None, l))
                        .collect(),
                };
                let index = pick.index(body.len());
                let range = body.descendant_range(index);
                let start = body.rows[index].level;
                prop_assert_eq!(range.start, index + 1);
                for i in range.clone() {
                    prop_assert!(body.rows[i].level > start);
                }
                if let Some(stop) = body.rows.get(range.end) {
                    prop_assert!(stop.level <= start);
                }
            }
        }
    }
}
