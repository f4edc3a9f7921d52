#![forbid(unsafe_code)]

//! End-to-end scenarios through [`GridApi`].
//!
//! # Running Tests
//!
//! ```sh
//! cargo test -p dgrid --test grid_api_e2e
//! cargo test -p dgrid --test grid_api_e2e --features state-persistence
//! ```
//!
//! # Invariants
//!
//! 1. **Metadata first**: `initialize` announces the header before any rows
//! 2. **Collapse hides descendants only**: siblings and the footer stay visible
//! 3. **Exception lists**: under `ALL`, unselecting one row records exactly it
//! 4. **Identity across reloads**: selection follows ids onto new row objects
//! 5. **Preferences survive instances**: column visibility and order are
//!    restored by a second grid over the same storage

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use dgrid::prelude::*;
use dgrid::core::CustomException;
use dgrid::runtime::ScriptedEndpoint;
use dgrid::{
    AllowAll, BreakdownId, ColumnDef, EventPayload, GridError, MemoryStorage, MetaData,
    NodePayload, PreferenceRegistry, RowPayload, SelectionKind, Stats,
};
use serde_json::json;

// ============================================================================
// Test Utilities
// ============================================================================

fn catalog() -> Vec<ColumnDef> {
    let mut name = ColumnDef::new("name");
    name.permanent = true;
    let mut clicks = ColumnDef::new("clicks");
    clicks.default = true;
    clicks.initial_order = SortOrder::Desc;
    let mut domain = ColumnDef::new("domain");
    domain.default = true;
    domain.exceptions.breakdowns = Some(vec!["publisher".into()]);
    let mut bid = ColumnDef::new("bid");
    bid.default = true;
    bid.exceptions.breakdowns = Some(vec!["publisher".into()]);
    bid.exceptions.custom = vec![CustomException {
        level: "accounts".into(),
        breakdown: "account".into(),
        shown: true,
    }];
    vec![name, clicks, domain, bid, ColumnDef::new("cpm")]
}

fn leaf_node(level: usize, parent: &str) -> NodePayload {
    NodePayload::child(
        level,
        parent,
        vec![
            RowPayload::new(format!("{parent}x")),
            RowPayload::new(format!("{parent}y")),
        ],
    )
    .paginated(0, 2, Some(2))
}

/// Three levels: `a` and `b`, two children each, two grandchildren each.
/// Requests for a node page of `b` answer with `b3`.
fn endpoint() -> ScriptedEndpoint {
    let meta = MetaData {
        level: "accounts".into(),
        columns: catalog(),
    };
    ScriptedEndpoint::new(meta).respond_with(|config| {
        if !config.parents.is_empty() {
            return Ok(vec![
                NodePayload::child(1, "b", vec![RowPayload::new("b3")])
                    .paginated(config.offset, config.limit, Some(3)),
            ]);
        }
        let branch = |id: &str, count: usize| {
            RowPayload::new(id).stat("clicks", 10).with_breakdown(
                NodePayload::child(
                    1,
                    id,
                    vec![
                        RowPayload::new(format!("{id}1")).with_breakdown(leaf_node(2, &format!("{id}1"))),
                        RowPayload::new(format!("{id}2")).with_breakdown(leaf_node(2, &format!("{id}2"))),
                    ],
                )
                .paginated(0, 2, Some(count)),
            )
        };
        Ok(vec![
            NodePayload::root(vec![branch("a", 2), branch("b", 3), RowPayload::new("c")])
                .paginated(0, 20, Some(3))
                .with_totals(Stats::from([("clicks".to_owned(), json!(30))])),
        ])
    })
}

fn api_with(endpoint: &ScriptedEndpoint, options: GridOptions) -> GridApi {
    let api = GridApi::new(
        Rc::new(endpoint.clone()),
        options,
        Rc::new(dgrid::core::NoopPreferences),
        Rc::new(AllowAll),
        DataSourceConfig::default(),
    );
    api.data_source()
        .set_breakdown(vec!["account".into(), "campaign".into(), "ad".into()], false);
    api
}

fn initialized(options: GridOptions) -> (GridApi, ScriptedEndpoint) {
    let endpoint = endpoint();
    let api = api_with(&endpoint, options);
    assert_eq!(pollster::block_on(api.initialize()).unwrap(), LoadOutcome::Applied);
    (api, endpoint)
}

fn key_of(api: &GridApi, id: &str) -> RowKey {
    api.rows()
        .iter()
        .find(|r| r.id.as_ref().is_some_and(|i| i.as_str() == id))
        .map(|r| r.key)
        .unwrap()
}

fn ids(api: &GridApi, keys: &[RowKey]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| api.row(*k))
        .map(|r| r.id.map_or_else(|| "<page>".to_owned(), |id| id.to_string()))
        .collect()
}

fn fields(columns: &[dgrid::Column]) -> Vec<&str> {
    columns.iter().map(|c| c.field.as_str()).collect()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn initialize_announces_metadata_before_rows() {
    let endpoint = endpoint();
    let api = api_with(&endpoint, GridOptions::default());
    let log = Rc::new(RefCell::new(Vec::new()));
    for event in [GridEvent::MetadataUpdated, GridEvent::DataUpdated] {
        let log = Rc::clone(&log);
        api.register(event, move |event, _| log.borrow_mut().push(event));
    }

    assert!(!api.is_initialized());
    pollster::block_on(api.initialize()).unwrap();

    assert!(api.is_initialized());
    assert!(!api.is_loading());
    assert_eq!(endpoint.meta_calls(), 1);
    // Reset announcement, then the merged rows.
    assert_eq!(
        *log.borrow(),
        vec![GridEvent::MetadataUpdated, GridEvent::DataUpdated, GridEvent::DataUpdated]
    );
    assert_eq!(api.rows().len(), 3 + 2 * 2 + 2 * 4 + 1);
    let footer = api.footer().unwrap();
    assert_eq!(footer.level, 0);
    assert_eq!(footer.stat("clicks"), Some(&json!(30)));
}

#[test]
fn reload_requires_metadata() {
    let endpoint = endpoint();
    let api = api_with(&endpoint, GridOptions::default());
    let err = pollster::block_on(api.reload()).unwrap_err();
    assert_eq!(err, GridError::NotInitialized);
    assert!(endpoint.requests().is_empty());
}

#[test]
fn load_more_appends_node_page() {
    let (api, endpoint) = initialized(GridOptions::default());
    let more = api
        .rows()
        .iter()
        .find(|r| r.kind == dgrid::RowKind::Breakdown)
        .map(|r| r.key)
        .unwrap();
    let b = key_of(&api, "b");
    assert_eq!(api.row(more).unwrap().parent, Some(b));

    assert_eq!(pollster::block_on(api.load_more(more)).unwrap(), LoadOutcome::Applied);

    let request = endpoint.last_request().unwrap();
    assert_eq!(request.offset, 2);
    assert_eq!(request.parents, vec![BreakdownId::new("b")]);
    assert!(api.row(more).is_none());
    assert_eq!(key_of(&api, "b"), b);
    let children: Vec<String> = api
        .rows()
        .iter()
        .filter(|r| r.parent == Some(b))
        .filter_map(|r| r.id.as_ref().map(ToString::to_string))
        .collect();
    assert_eq!(children, vec!["b1", "b2", "b3"]);
}

#[test]
fn restructure_supersedes_pending_reload() {
    let (api, endpoint) = initialized(GridOptions::default());
    endpoint.hold(true);
    let stale = api.reload();
    let fresh = api.set_breakdown(vec!["publisher".into()]);
    assert!(api.is_loading());

    assert!(endpoint.release(2));
    assert_eq!(pollster::block_on(fresh).unwrap(), LoadOutcome::Applied);
    assert!(endpoint.release(1));
    assert_eq!(pollster::block_on(stale).unwrap(), LoadOutcome::Superseded);
    assert_eq!(api.data_source().breakdown(), vec!["publisher"]);
    assert_eq!(endpoint.last_request().unwrap().breakdown, vec!["publisher"]);
}

#[test]
fn save_patches_row_and_notifies() {
    let (api, endpoint) = initialized(GridOptions::default());
    let a = key_of(&api, "a");
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    api.register(GridEvent::StatsUpdated, move |_, payload| {
        if let EventPayload::Stats { row, field } = payload {
            *sink.borrow_mut() = Some((*row, field.clone()));
        }
    });

    pollster::block_on(api.save_data(json!(99), a, "clicks")).unwrap();

    assert_eq!(api.row(a).unwrap().stat("clicks"), Some(&json!(99)));
    assert_eq!(*seen.borrow(), Some((a, "clicks".to_owned())));
    assert_eq!(endpoint.saves(), vec![("clicks".to_owned(), json!(99))]);
}

#[test]
fn destroy_releases_everything() {
    let (api, endpoint) = initialized(GridOptions::default());
    let bus = api.bus().clone();
    let handle = api.register(GridEvent::DataUpdated, |_, _| {});
    bus.register(GridEvent::StatsUpdated, None, |_, _| {});
    assert!(bus.total_handlers() > 2);

    endpoint.hold(true);
    let pending = api.reload();
    api.destroy();

    assert_eq!(bus.total_handlers(), 0);
    assert!(!handle.is_active());
    endpoint.release_all();
    assert_eq!(pollster::block_on(pending).unwrap(), LoadOutcome::Superseded);
}

#[test]
fn dropping_the_api_deregisters_extensions() {
    let endpoint = endpoint();
    let api = api_with(&endpoint, GridOptions::default());
    let bus = api.bus().clone();
    let external = bus.register(GridEvent::DataUpdated, None, |_, _| {});
    drop(api);
    assert_eq!(bus.total_handlers(), 1);
    assert!(external.is_active());
}

// ============================================================================
// Collapse
// ============================================================================

#[test]
fn collapsing_a_root_hides_exactly_its_descendants() {
    let (api, _endpoint) = initialized(GridOptions::default());
    let before = api.visible_rows();
    let a = key_of(&api, "a");

    assert!(api.collapse().set_row_collapsed(a, true).unwrap());
    let after: BTreeSet<String> = ids(&api, &api.visible_rows()).into_iter().collect();
    let hidden: BTreeSet<String> = ids(&api, &before)
        .into_iter()
        .filter(|id| !after.contains(id))
        .collect();
    assert_eq!(
        hidden,
        BTreeSet::from(["a1", "a1x", "a1y", "a2", "a2x", "a2y"].map(String::from))
    );
    assert!(after.contains("b") && after.contains("b1x") && after.contains("c"));
    assert!(api.footer().unwrap().visible);

    assert!(api.collapse().set_row_collapsed(a, false).unwrap());
    assert_eq!(api.visible_rows(), before);
}

#[test]
fn leaf_rows_are_not_collapsable() {
    let (api, _endpoint) = initialized(GridOptions::default());
    let leaf = key_of(&api, "a1x");
    assert!(!api.collapse().set_row_collapsed(leaf, true).unwrap());
    let footer = api.footer().unwrap().key;
    assert!(!api.collapse().set_row_collapsed(footer, true).unwrap());
}

// ============================================================================
// Selection
// ============================================================================

fn selectable() -> GridOptions {
    GridOptions::new("campaigns").selection(SelectionOptions::enabled_for([0, 1, 2, 3]))
}

#[test]
fn unselecting_under_all_records_one_exception() {
    let (api, _endpoint) = initialized(selectable());
    let selection = api.selection();
    selection.select_all();
    let a2 = key_of(&api, "a2");

    assert!(selection.set_row_selection(a2, false).unwrap());

    assert!(!selection.is_row_selected(a2));
    for row in api.rows().iter().filter(|r| r.kind == dgrid::RowKind::Stats && r.key != a2) {
        assert!(selection.is_row_selected(row.key), "{:?} lost selection", row.id);
    }
    assert!(selection.is_row_selected(api.footer().unwrap().key));
    let snapshot = selection.selection();
    assert_eq!(snapshot.kind, SelectionKind::All);
    assert_eq!(snapshot.unselected.len(), 1);
    assert!(snapshot.selected.is_empty());
}

#[test]
fn selection_is_reconciled_by_id_after_reload() {
    let (api, _endpoint) = initialized(selectable());
    let selection = api.selection();
    let (old_a, old_c) = (key_of(&api, "a"), key_of(&api, "c"));
    selection.set_row_selection(old_a, true).unwrap();
    selection.set_row_selection(old_c, true).unwrap();

    pollster::block_on(api.reload()).unwrap();

    let (new_a, new_c) = (key_of(&api, "a"), key_of(&api, "c"));
    assert_ne!((new_a, new_c), (old_a, old_c));
    assert_eq!(selection.selected_rows(), vec![new_a, new_c]);
    let refs = selection.selection().selected;
    assert!(refs.iter().all(|r| r.key == new_a || r.key == new_c));
    assert!(!selection.is_row_selected(key_of(&api, "b")));
    assert!(api.row(new_a).unwrap().selected);
}

#[test]
fn failed_reload_keeps_rows_and_selection() {
    let (api, endpoint) = initialized(selectable());
    let selection = api.selection();
    let a = key_of(&api, "a");
    selection.set_row_selection(a, true).unwrap();
    let before = api.rows().len();

    let _ = endpoint
        .clone()
        .respond_with(|_| Err(dgrid::core::EndpointError::Transport("offline".into())));
    let err = pollster::block_on(api.reload());

    assert!(matches!(err, Err(GridError::Endpoint(_))));
    assert_eq!(api.rows().len(), before);
    assert!(api.footer().is_some());
    assert!(api.data_source().has_data());
    assert!(!selection.is_restore_pending());
    assert_eq!(selection.selected_rows(), vec![key_of(&api, "a")]);
    assert!(api.row(key_of(&api, "a")).unwrap().selected);
}

// ============================================================================
// Order and columns
// ============================================================================

#[test]
fn order_change_reloads_with_signed_order() {
    let (api, endpoint) = initialized(GridOptions::default());
    let requests = endpoint.requests().len();

    pollster::block_on(api.order().toggle_column_order("clicks")).unwrap();

    assert_eq!(endpoint.requests().len(), requests + 1);
    assert_eq!(endpoint.last_request().unwrap().order.as_deref(), Some("-clicks"));
    assert_eq!(api.order().order().as_deref(), Some("-clicks"));
    assert_eq!(api.grid().borrow().header.ordered_count(), 1);
}

#[test]
fn custom_exception_beats_allow_list() {
    let (api, _endpoint) = initialized(GridOptions::default());
    let visible = api.columns().visible_columns();
    assert_eq!(fields(&visible), vec!["name", "clicks", "bid"]);

    pollster::block_on(api.set_breakdown(vec!["publisher".into()])).unwrap();
    assert_eq!(
        fields(&api.columns().visible_columns()),
        vec!["name", "clicks", "domain", "bid"]
    );
}

// ============================================================================
// Preferences
// ============================================================================

fn persisted(endpoint: &ScriptedEndpoint, storage: &MemoryStorage) -> GridApi {
    let registry = PreferenceRegistry::new(Box::new(storage.clone())).shared();
    let api = GridApi::with_registry(
        Rc::new(endpoint.clone()),
        GridOptions::new("campaigns"),
        registry,
        Rc::new(AllowAll),
        DataSourceConfig::default(),
    )
    .unwrap();
    api.data_source().set_breakdown(vec!["account".into()], false);
    api
}

#[test]
fn preferences_round_trip_across_instances() {
    let storage = MemoryStorage::new();
    let endpoint = endpoint();

    let first = persisted(&endpoint, &storage);
    pollster::block_on(first.initialize()).unwrap();
    assert!(first.columns().set_column_visibility("cpm", true).unwrap());
    assert!(first.columns().set_column_visibility("clicks", false).unwrap());
    pollster::block_on(first.order().set_column_order("cpm", SortOrder::Asc)).unwrap();
    first.destroy();

    let second = persisted(&endpoint, &storage);
    pollster::block_on(second.initialize()).unwrap();
    assert_eq!(fields(&second.columns().visible_columns()), vec!["name", "bid", "cpm"]);
    assert_eq!(second.order().order().as_deref(), Some("cpm"));
    assert_eq!(endpoint.last_request().unwrap().order.as_deref(), Some("cpm"));
}

#[cfg(feature = "state-persistence")]
#[test]
fn preferences_persist_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.json");
    let endpoint = endpoint();
    let open = || {
        GridApi::with_registry(
            Rc::new(endpoint.clone()),
            GridOptions::new("campaigns"),
            PreferenceRegistry::with_file(&path).shared(),
            Rc::new(AllowAll),
            DataSourceConfig::default(),
        )
        .unwrap()
    };

    let first = open();
    pollster::block_on(first.initialize()).unwrap();
    first.columns().set_column_visibility("cpm", true).unwrap();
    first.destroy();
    assert!(path.exists());

    let second = open();
    pollster::block_on(second.initialize()).unwrap();
    assert!(fields(&second.columns().visible_columns()).contains(&"cpm"));
}
