#![forbid(unsafe_code)]

//! One wired grid instance.
//!
//! [`GridApi`] owns the grid, its bus, the breakdown data source and the four
//! extensions. Extensions register on the bus in a fixed order (columns,
//! order, selection, collapse) so derived state is settled in that order
//! after every `METADATA_UPDATED` / `DATA_UPDATED`.
//!
//! # Lifecycle
//!
//! ```text
//! new ──► initialize ──► (reload | get_data | set_* | save_data)* ──► destroy
//! ```
//!
//! Dropping a `GridApi` releases every registration it made. [`GridApi::destroy`]
//! additionally aborts in-flight requests and clears handlers registered
//! directly on the bus.

use std::fmt;
use std::rc::Rc;

use dgrid_core::{
    Deregister, EventPayload, GridBus, GridError, GridEvent, GridOptions, GridResult, GridRow,
    LoadOutcome, NodeRef, PermissionOracle, PreferenceStore, RowKey, SharedGrid, Stats,
    SubscriptionScope,
};
use dgrid_extensions::{CollapseExtension, ColumnsExtension, OrderExtension, SelectionExtension};
use dgrid_runtime::{
    AggregationEndpoint, BreakdownDataSource, DataSourceConfig, PreferenceRegistry,
    RegistryPreferenceStore,
};
use futures_util::FutureExt;
use futures_util::future::{LocalBoxFuture, ready};
use serde_json::Value;

use crate::Result;

/// Grid, bus, data source and extensions of one widget instance.
pub struct GridApi {
    grid: SharedGrid,
    bus: GridBus,
    source: BreakdownDataSource,
    columns: ColumnsExtension,
    order: OrderExtension,
    selection: SelectionExtension,
    collapse: CollapseExtension,
    scope: SubscriptionScope,
}

impl fmt::Debug for GridApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridApi")
            .field("namespace", &self.grid.borrow().meta.options.namespace)
            .field("source", &self.source)
            .field("handlers", &self.bus.total_handlers())
            .finish_non_exhaustive()
    }
}

impl GridApi {
    /// Wire a grid fed by `endpoint`, persisting preferences in `store`.
    #[must_use]
    pub fn new(
        endpoint: Rc<dyn AggregationEndpoint>,
        options: GridOptions,
        store: Rc<dyn PreferenceStore>,
        oracle: Rc<dyn PermissionOracle>,
        config: DataSourceConfig,
    ) -> Self {
        let grid = dgrid_core::Grid::new(options).shared();
        let bus = GridBus::new();
        let source = BreakdownDataSource::new(
            Rc::clone(&grid),
            bus.clone(),
            endpoint,
            oracle,
            config,
        );
        let shared: Rc<dyn dgrid_core::GridDataSource> = Rc::new(source.clone());

        let columns = ColumnsExtension::new(
            Rc::clone(&grid),
            bus.clone(),
            Rc::clone(&shared),
            Rc::clone(&store),
        );
        let order = OrderExtension::new(Rc::clone(&grid), bus.clone(), Rc::clone(&shared), store);
        let selection = SelectionExtension::new(Rc::clone(&grid), bus.clone());
        let collapse = CollapseExtension::new(Rc::clone(&grid), bus.clone(), shared);

        tracing::debug!(
            namespace = %grid.borrow().meta.options.namespace,
            handlers = bus.total_handlers(),
            "grid created"
        );
        Self {
            grid,
            bus,
            source,
            columns,
            order,
            selection,
            collapse,
            scope: SubscriptionScope::new(),
        }
    }

    /// Like [`GridApi::new`], with preferences kept in `registry`.
    ///
    /// The registry is loaded from its backend first.
    pub fn with_registry(
        endpoint: Rc<dyn AggregationEndpoint>,
        options: GridOptions,
        registry: Rc<PreferenceRegistry>,
        oracle: Rc<dyn PermissionOracle>,
        config: DataSourceConfig,
    ) -> Result<Self> {
        let loaded = registry.load()?;
        tracing::debug!(loaded, backend = registry.backend_name(), "preferences loaded");
        let store: Rc<dyn PreferenceStore> = Rc::new(RegistryPreferenceStore::new(registry));
        Ok(Self::new(endpoint, options, store, oracle, config))
    }

    /// Load the metadata, then the base level.
    pub fn initialize(&self) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        let source = self.source.clone();
        async move {
            source.get_meta_data(false).await?;
            source.get_data(None, None).await
        }
        .boxed_local()
    }

    /// Full reload of the base level.
    ///
    /// Fails with [`GridError::NotInitialized`] before metadata is loaded.
    pub fn reload(&self) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        if !self.is_initialized() {
            return ready(Err(GridError::NotInitialized)).boxed_local();
        }
        self.source.get_data(None, None)
    }

    /// Next page of `node`.
    pub fn get_data(
        &self,
        node: NodeRef,
        additional_rows: Option<usize>,
    ) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        self.source.get_data(Some(node), additional_rows)
    }

    /// Next page of the node closed by the pagination row `row`.
    pub fn load_more(&self, row: RowKey) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        self.source.load_more(row)
    }

    /// Replace the breakdown path and reload.
    pub fn set_breakdown(&self, dimensions: Vec<String>) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        self.source.set_breakdown(dimensions, true);
        self.reload()
    }

    /// Persist an edited cell.
    pub fn save_data(
        &self,
        value: Value,
        row: RowKey,
        field: &str,
    ) -> LocalBoxFuture<'static, GridResult<Stats>> {
        self.source.save_data(value, row, field)
    }

    /// Register `handler` for `event` until this grid is dropped or destroyed.
    pub fn register(
        &self,
        event: GridEvent,
        handler: impl Fn(GridEvent, &EventPayload) + 'static,
    ) -> Deregister {
        self.bus.register(event, Some(&self.scope), handler)
    }

    // --- Accessors ----------------------------------------------------------

    #[must_use]
    pub fn grid(&self) -> &SharedGrid {
        &self.grid
    }

    #[must_use]
    pub fn bus(&self) -> &GridBus {
        &self.bus
    }

    #[must_use]
    pub fn data_source(&self) -> &BreakdownDataSource {
        &self.source
    }

    #[must_use]
    pub fn columns(&self) -> &ColumnsExtension {
        &self.columns
    }

    #[must_use]
    pub fn order(&self) -> &OrderExtension {
        &self.order
    }

    #[must_use]
    pub fn selection(&self) -> &SelectionExtension {
        &self.selection
    }

    #[must_use]
    pub fn collapse(&self) -> &CollapseExtension {
        &self.collapse
    }

    // --- Queries ------------------------------------------------------------

    /// Whether metadata has been loaded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.source.meta_data().is_some()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.source.is_loading()
    }

    /// Snapshot of every body row in display order.
    #[must_use]
    pub fn rows(&self) -> Vec<GridRow> {
        self.grid.borrow().body.rows.clone()
    }

    /// Keys of the body rows not hidden by a collapsed ancestor.
    #[must_use]
    pub fn visible_rows(&self) -> Vec<RowKey> {
        self.collapse.visible_rows()
    }

    #[must_use]
    pub fn footer(&self) -> Option<GridRow> {
        self.grid.borrow().footer.row.clone()
    }

    /// Row with `key`, footer included.
    #[must_use]
    pub fn row(&self, key: RowKey) -> Option<GridRow> {
        self.grid.borrow().row(key).cloned()
    }

    /// Tear the instance down.
    ///
    /// Outstanding requests resolve as superseded, extensions stop listening
    /// and every remaining handler is removed from the bus.
    pub fn destroy(self) {
        let Self {
            grid,
            bus,
            source,
            columns,
            order,
            selection,
            collapse,
            scope,
        } = self;
        source.abort();
        drop((collapse, selection, order, columns));
        scope.release();
        bus.clear();
        tracing::debug!(
            namespace = %grid.borrow().meta.options.namespace,
            "grid destroyed"
        );
    }
}
