#![forbid(unsafe_code)]

//! Extensions driven by a real data source across full reloads.
//!
//! # Invariants
//!
//! 1. **Selection by id**: selection survives a reload on the new row objects
//! 2. **Level collapse sticks**: rows of a collapsed level stay collapsed when
//!    reloaded or paged in

use std::rc::Rc;

use dgrid_core::{
    AllowAll, ColumnDef, Grid, GridBus, GridDataSource, GridOptions, MetaData, NodeRef, RowKey,
    SelectionOptions, SharedGrid,
};
use dgrid_extensions::{CollapseExtension, SelectionExtension};
use dgrid_runtime::{BreakdownDataSource, DataSourceConfig, NodePayload, RowPayload, ScriptedEndpoint};

fn endpoint() -> ScriptedEndpoint {
    let meta = MetaData {
        level: "accounts".into(),
        columns: vec![ColumnDef::new("name")],
    };
    ScriptedEndpoint::new(meta).respond_with(|config| {
        if !config.parents.is_empty() {
            return Ok(vec![
                NodePayload::child(1, "a", vec![RowPayload::new("a3")]).paginated(config.offset, config.limit, Some(3)),
            ]);
        }
        Ok(vec![
            NodePayload::root(vec![
                RowPayload::new("a").with_breakdown(
                    NodePayload::child(1, "a", vec![RowPayload::new("a1"), RowPayload::new("a2")])
                        .paginated(0, 2, Some(3)),
                ),
                RowPayload::new("b"),
                RowPayload::new("c"),
            ])
            .paginated(0, 20, Some(3)),
        ])
    })
}

fn source(options: GridOptions) -> (BreakdownDataSource, SharedGrid, GridBus) {
    let grid = Grid::new(options).shared();
    let bus = GridBus::new();
    let ds = BreakdownDataSource::new(
        Rc::clone(&grid),
        bus.clone(),
        Rc::new(endpoint()),
        Rc::new(AllowAll),
        DataSourceConfig::default(),
    );
    ds.set_breakdown(vec!["account".into(), "campaign".into()], false);
    (ds, grid, bus)
}

fn key_of(grid: &SharedGrid, id: &str) -> RowKey {
    grid.borrow()
        .body
        .rows
        .iter()
        .find(|r| r.id.as_ref().is_some_and(|i| i.as_str() == id))
        .map(|r| r.key)
        .unwrap()
}

#[test]
fn selection_follows_ids_across_reload() {
    let (ds, grid, bus) =
        source(GridOptions::default().selection(SelectionOptions::enabled_for([1, 2])));
    let selection = SelectionExtension::new(Rc::clone(&grid), bus.clone());

    pollster::block_on(ds.get_data(None, None)).unwrap();
    let (old_a, old_c) = (key_of(&grid, "a"), key_of(&grid, "c"));
    selection.set_row_selection(old_a, true).unwrap();
    selection.set_row_selection(old_c, true).unwrap();

    pollster::block_on(ds.get_data(None, None)).unwrap();
    let (new_a, new_c) = (key_of(&grid, "a"), key_of(&grid, "c"));
    assert_ne!(new_a, old_a);
    assert_eq!(selection.selected_rows(), vec![new_a, new_c]);
    assert!(!selection.is_row_selected(key_of(&grid, "b")));
    assert!(!selection.is_restore_pending());
}

#[test]
fn collapsed_level_applies_to_paged_and_reloaded_rows() {
    let (ds, grid, bus) = source(GridOptions::default());
    let shared: Rc<dyn GridDataSource> = Rc::new(ds.clone());
    let collapse = CollapseExtension::new(Rc::clone(&grid), bus.clone(), shared);

    pollster::block_on(ds.get_data(None, None)).unwrap();
    assert_eq!(collapse.set_level_collapsed(1, true), 3);
    let visible_ids = |grid: &SharedGrid| -> Vec<String> {
        grid.borrow()
            .body
            .visible_rows()
            .filter_map(|r| r.id.as_ref().map(ToString::to_string))
            .collect()
    };
    assert_eq!(visible_ids(&grid), vec!["a", "b", "c"]);

    pollster::block_on(ds.get_data(Some(NodeRef::child_of(1, "a".into())), Some(1))).unwrap();
    assert_eq!(visible_ids(&grid), vec!["a", "b", "c"]);
    assert!(collapse.is_row_collapsed(key_of(&grid, "a")));

    pollster::block_on(ds.get_data(None, None)).unwrap();
    assert!(collapse.is_row_collapsed(key_of(&grid, "a")));
    assert_eq!(visible_ids(&grid), vec!["a", "b", "c"]);

    collapse.set_level_collapsed(1, false);
    assert_eq!(visible_ids(&grid), vec!["a", "a1", "a2", "b", "c"]);
}
