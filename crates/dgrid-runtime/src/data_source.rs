#![forbid(unsafe_code)]

//! Breakdown data source: the only writer of the grid's rows.
//!
//! # How it works
//!
//! 1. [`BreakdownDataSource::get_meta_data`] loads (or returns the cached)
//!    column catalog, rebuilds the header and emits `METADATA_UPDATED`.
//! 2. [`BreakdownDataSource::get_data`] without a node publishes an empty
//!    body with `DATA_UPDATED`, then requests the base level. The tree is
//!    kept until the response replaces it. With a node it requests that
//!    node's next page.
//! 3. Each request is registered with the [`RequestTracker`] before it is
//!    issued; superseded requests resolve to [`LoadOutcome::Superseded`]
//!    without touching the tree.
//! 4. A successful response is merged node by node, flattened into the
//!    body, and announced with exactly one `DATA_UPDATED`.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Endpoint rejects a fetch | `GridError::Endpoint` returned, tree untouched, previous body republished |
//! | Newer request supersedes | `LoadOutcome::Superseded`, nothing emitted |
//! | Response node without owner | Logged and dropped, rest of batch applied |
//! | Every node of a page dropped | `GridError::UnknownNode` returned, nothing emitted |
//! | Save rejected | `GridError::Save` returned, stats untouched |
//!
//! The returned futures do the merging; a future that is never polled never
//! applies its response.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use dgrid_core::{
    Column, EventPayload, GridBus, GridDataSource, GridError, GridEvent, GridResult, LoadOutcome,
    GridRow, MetaData, NodeRef, PermissionOracle, RowKey, RowKeyAllocator, RowKind, SharedGrid,
    Stats,
};
use futures_util::FutureExt;
use futures_util::future::{Abortable, LocalBoxFuture, ready};
use serde_json::Value;

use crate::endpoint::{AggregationEndpoint, DateRange, NodePayload, RequestConfig};
use crate::request::{RequestId, RequestTarget, RequestTracker};
use crate::tree::{BreakdownNode, BreakdownTree, MergeOutcome};

/// Page sizes used by the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSourceConfig {
    /// Rows requested for the base level on a full load.
    pub base_page_size: usize,
    /// Rows requested per nested level embedded in a full load.
    pub child_page_size: usize,
    /// Rows requested by "load more" when no count is given.
    pub load_more_step: usize,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            base_page_size: 20,
            child_page_size: 5,
            load_more_step: 5,
        }
    }
}

impl DataSourceConfig {
    #[must_use]
    pub fn base_page_size(mut self, size: usize) -> Self {
        self.base_page_size = size;
        self
    }

    #[must_use]
    pub fn child_page_size(mut self, size: usize) -> Self {
        self.child_page_size = size;
        self
    }

    #[must_use]
    pub fn load_more_step(mut self, step: usize) -> Self {
        self.load_more_step = step;
        self
    }
}

#[derive(Debug, Default)]
struct SourceState {
    breakdown: Vec<String>,
    order: Option<String>,
    filters: BTreeMap<String, Value>,
    date_range: Option<DateRange>,
    meta: Option<MetaData>,
    tree: BreakdownTree,
    tracker: RequestTracker,
    saves_in_flight: usize,
    /// Body and footer hidden by a pending full reload.
    stale: Option<(Vec<GridRow>, Option<GridRow>)>,
}

struct SourceInner {
    grid: SharedGrid,
    bus: GridBus,
    endpoint: Rc<dyn AggregationEndpoint>,
    oracle: Rc<dyn PermissionOracle>,
    config: DataSourceConfig,
    keys: RowKeyAllocator,
    state: RefCell<SourceState>,
}

impl SourceInner {
    fn apply_meta(&self, meta: &MetaData) {
        let columns: Vec<Column> = meta
            .columns
            .iter()
            .map(|def| Column::from_def(def, self.oracle.as_ref()))
            .collect();
        {
            let mut grid = self.grid.borrow_mut();
            grid.header.columns = columns;
            grid.meta.data = Some(meta.clone());
            grid.meta.initialized = true;
        }
        self.state.borrow_mut().meta = Some(meta.clone());
        tracing::debug!(level = %meta.level, columns = meta.columns.len(), "metadata loaded");
        self.bus.emit(GridEvent::MetadataUpdated);
    }

    /// Clear tree and body, then announce the empty body.
    fn reset_rows(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.tree.clear();
            state.stale = None;
        }
        {
            let mut grid = self.grid.borrow_mut();
            grid.body.rows.clear();
            grid.footer.row = None;
        }
        self.bus.emit(GridEvent::DataUpdated);
    }

    /// Announce an empty body for a pending full reload.
    ///
    /// The tree stays as it is; the published rows are kept aside so a
    /// failed reload can put them back.
    fn hide_rows(&self) {
        {
            let mut grid = self.grid.borrow_mut();
            let rows = std::mem::take(&mut grid.body.rows);
            let footer = grid.footer.row.take();
            let mut state = self.state.borrow_mut();
            if state.stale.is_none() && (!rows.is_empty() || footer.is_some()) {
                state.stale = Some((rows, footer));
            }
        }
        self.bus.emit(GridEvent::DataUpdated);
    }

    /// Republish rows hidden by [`hide_rows`](Self::hide_rows), if any.
    fn restore_rows(&self) -> bool {
        let Some((rows, footer)) = self.state.borrow_mut().stale.take() else {
            return false;
        };
        {
            let mut grid = self.grid.borrow_mut();
            grid.body.rows = rows;
            grid.footer.row = footer;
            grid.body.refresh_visibility();
            tracing::debug!(rows = grid.body.len(), "previous rows restored");
        }
        self.bus.emit(GridEvent::DataUpdated);
        true
    }

    fn sync_loading(&self) {
        let loading = !self.state.borrow().tracker.is_empty();
        self.grid.borrow_mut().meta.loading = loading;
    }

    /// Merge a response batch and publish the new body.
    ///
    /// A full load replaces the tree. Returns `false`, publishing nothing,
    /// when every node of a page batch was dropped.
    fn apply(&self, id: RequestId, nodes: Vec<NodePayload>, full: bool) -> bool {
        let published = {
            let previous: HashMap<RowKey, bool> = self
                .grid
                .borrow()
                .body
                .rows
                .iter()
                .map(|r| (r.key, r.collapsed))
                .collect();
            let mut state = self.state.borrow_mut();
            if full {
                state.tree.clear();
            }
            let total = nodes.len();
            let mut dropped = 0;
            for node in nodes {
                let outcome = state.tree.merge(node, &self.keys);
                tracing::debug!(request = %id, ?outcome, "merged node");
                if outcome == MergeOutcome::Dropped {
                    dropped += 1;
                    crate::debug_trace!("{id} dropped an orphan node");
                }
            }
            if !full && total > 0 && dropped == total {
                None
            } else {
                state.stale = None;
                Some(state.tree.flatten(&previous))
            }
        };
        let Some((rows, footer)) = published else {
            tracing::warn!(request = %id, "no node of the response could be merged");
            return false;
        };
        {
            let mut grid = self.grid.borrow_mut();
            grid.body.rows = rows;
            grid.footer.row = footer;
            grid.body.refresh_visibility();
            tracing::debug!(request = %id, rows = grid.body.len(), "data applied");
        }
        self.bus.emit(GridEvent::DataUpdated);
        true
    }
}

/// Counts one save as in flight until dropped.
struct SaveInFlight(Rc<SourceInner>);

impl SaveInFlight {
    fn start(inner: Rc<SourceInner>) -> Self {
        inner.state.borrow_mut().saves_in_flight += 1;
        Self(inner)
    }
}

impl Drop for SaveInFlight {
    fn drop(&mut self) {
        let mut state = self.0.state.borrow_mut();
        state.saves_in_flight = state.saves_in_flight.saturating_sub(1);
    }
}

/// Fetches, assembles and incrementally extends the row tree of one grid.
///
/// Cloning yields another handle to the same source.
#[derive(Clone)]
pub struct BreakdownDataSource {
    inner: Rc<SourceInner>,
}

impl fmt::Debug for BreakdownDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("BreakdownDataSource")
            .field("breakdown", &state.breakdown)
            .field("order", &state.order)
            .field("tracker", &state.tracker)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl BreakdownDataSource {
    /// Source filling `grid` from `endpoint` and announcing changes on `bus`.
    #[must_use]
    pub fn new(
        grid: SharedGrid,
        bus: GridBus,
        endpoint: Rc<dyn AggregationEndpoint>,
        oracle: Rc<dyn PermissionOracle>,
        config: DataSourceConfig,
    ) -> Self {
        Self {
            inner: Rc::new(SourceInner {
                grid,
                bus,
                endpoint,
                oracle,
                config,
                keys: RowKeyAllocator::new(),
                state: RefCell::new(SourceState::default()),
            }),
        }
    }

    /// The grid this source writes.
    #[must_use]
    pub fn grid(&self) -> &SharedGrid {
        &self.inner.grid
    }

    #[must_use]
    pub fn config(&self) -> DataSourceConfig {
        self.inner.config
    }

    /// Column catalog, from cache unless missing or `force_reload`.
    ///
    /// Emits `METADATA_UPDATED` whenever the endpoint is asked.
    pub fn get_meta_data(&self, force_reload: bool) -> LocalBoxFuture<'static, GridResult<MetaData>> {
        let inner = Rc::clone(&self.inner);
        async move {
            if !force_reload
                && let Some(meta) = inner.state.borrow().meta.clone()
            {
                return Ok(meta);
            }
            let meta = inner.endpoint.get_meta_data().await?;
            inner.apply_meta(&meta);
            Ok(meta)
        }
        .boxed_local()
    }

    /// Load rows.
    ///
    /// Without `node`, reloads the base level; the current rows are hidden
    /// meanwhile and come back if the reload fails. With `node`, requests
    /// `additional_rows` (default: the load-more step) after the node's last
    /// page. A page whose response cannot be merged anywhere fails with
    /// [`GridError::UnknownNode`].
    pub fn get_data(
        &self,
        node: Option<NodeRef>,
        additional_rows: Option<usize>,
    ) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        let inner = Rc::clone(&self.inner);
        let prepared = match node {
            None => self.prepare_full_load(),
            Some(node) => self.prepare_page(node, additional_rows),
        };
        let (id, target, config) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return ready(Err(e)).boxed_local(),
        };

        let page_node = match &target {
            RequestTarget::Full { .. } => None,
            RequestTarget::Node { node, .. } => Some(node.clone()),
        };
        let is_full = page_node.is_none();
        let registration = inner.state.borrow_mut().tracker.register_as(id, target);
        tracing::debug!(
            request = %id,
            level = config.level,
            offset = config.offset,
            limit = config.limit,
            "issuing data request"
        );
        crate::debug_trace!("{id} issued: level={} offset={} limit={}", config.level, config.offset, config.limit);

        if is_full {
            inner.hide_rows();
        }
        inner.grid.borrow_mut().meta.loading = true;

        let response = Abortable::new(inner.endpoint.get_data(config), registration);
        async move {
            let result = response.await;
            let current = inner.state.borrow_mut().tracker.finish(id);
            inner.sync_loading();
            let result = match result {
                Ok(result) if current => result,
                _ => {
                    tracing::debug!(request = %id, "superseded response ignored");
                    if is_full && !inner.state.borrow().tracker.has_full_load() {
                        inner.restore_rows();
                    }
                    return Ok(LoadOutcome::Superseded);
                }
            };
            match result {
                Ok(nodes) => {
                    if inner.apply(id, nodes, is_full) {
                        Ok(LoadOutcome::Applied)
                    } else {
                        Err(GridError::UnknownNode(page_node.unwrap_or_else(NodeRef::root)))
                    }
                }
                Err(e) => {
                    tracing::debug!(request = %id, error = %e, "data request failed");
                    if is_full {
                        inner.restore_rows();
                    }
                    Err(GridError::Endpoint(e))
                }
            }
        }
        .boxed_local()
    }

    fn prepare_full_load(&self) -> GridResult<(RequestId, RequestTarget, RequestConfig)> {
        let mut state = self.inner.state.borrow_mut();
        let id = state.tracker.next_id();
        let config = RequestConfig {
            level: 1,
            offset: 0,
            limit: self.inner.config.base_page_size,
            child_limit: (state.breakdown.len() > 1).then_some(self.inner.config.child_page_size),
            breakdown: state.breakdown.clone(),
            parents: Vec::new(),
            order: state.order.clone(),
            date_range: state.date_range.clone(),
            filters: state.filters.clone(),
        };
        let target = RequestTarget::Full {
            breakdown: state.breakdown.clone(),
        };
        Ok((id, target, config))
    }

    fn prepare_page(
        &self,
        node: NodeRef,
        additional_rows: Option<usize>,
    ) -> GridResult<(RequestId, RequestTarget, RequestConfig)> {
        let mut state = self.inner.state.borrow_mut();
        let Some(current) = state.tree.node(&node) else {
            return Err(GridError::UnknownNode(node));
        };
        let pagination = current.pagination;
        let parents = state.tree.path_to(&node).unwrap_or_default();
        let path: Vec<String> = state
            .breakdown
            .iter()
            .take(node.level + 1)
            .cloned()
            .collect();
        let config = RequestConfig {
            level: node.level + 1,
            offset: pagination.next_offset(),
            limit: additional_rows.unwrap_or(self.inner.config.load_more_step),
            child_limit: None,
            breakdown: path.clone(),
            parents,
            order: state.order.clone(),
            date_range: state.date_range.clone(),
            filters: state.filters.clone(),
        };
        let id = state.tracker.next_id();
        Ok((id, RequestTarget::Node { node, breakdown: path }, config))
    }

    /// Load the next page of the node closed by the pagination row `row`.
    pub fn load_more(&self, row: RowKey) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        let info = {
            let grid = self.inner.grid.borrow();
            grid.body
                .row(row)
                .filter(|r| r.kind == RowKind::Breakdown)
                .and_then(|r| r.node.clone())
        };
        match info {
            Some(info) => self.get_data(Some(info.node), None),
            None => ready(Err(GridError::UnknownRow(row))).boxed_local(),
        }
    }

    /// Set the breakdown dimension path.
    ///
    /// With `reset_if_base_changed`, a change of the first dimension clears
    /// the rows immediately. Returns whether that happened.
    pub fn set_breakdown(&self, dimensions: Vec<String>, reset_if_base_changed: bool) -> bool {
        let base_changed = {
            let mut state = self.inner.state.borrow_mut();
            let changed = state.breakdown.first() != dimensions.first();
            tracing::debug!(breakdown = ?dimensions, "breakdown set");
            state.breakdown = dimensions;
            changed
        };
        if reset_if_base_changed && base_changed {
            self.inner.state.borrow_mut().tracker.abort_all();
            self.inner.sync_loading();
            self.inner.reset_rows();
            return true;
        }
        false
    }

    /// Abort every outstanding data request. Their futures resolve to
    /// [`LoadOutcome::Superseded`].
    ///
    /// Rows hidden by an aborted full reload are republished.
    pub fn abort(&self) {
        self.inner.state.borrow_mut().tracker.abort_all();
        self.inner.sync_loading();
        self.inner.restore_rows();
    }

    /// Set or clear the signed order string.
    pub fn set_order(&self, order: Option<String>) {
        self.inner.state.borrow_mut().order = order.filter(|o| !o.is_empty());
    }

    /// Set (`Some`) or remove (`None`) a request filter.
    pub fn set_filter(&self, key: impl Into<String>, value: Option<Value>) {
        let key = key.into();
        let mut state = self.inner.state.borrow_mut();
        match value {
            Some(value) => {
                state.filters.insert(key, value);
            }
            None => {
                state.filters.remove(&key);
            }
        }
    }

    /// Set or clear the reporting period.
    pub fn set_date_range(&self, range: Option<DateRange>) {
        self.inner.state.borrow_mut().date_range = range;
    }

    /// Persist an edited cell and patch the returned stats into the row.
    ///
    /// Emits `STATS_UPDATED` with the row and field on success.
    pub fn save_data(
        &self,
        value: Value,
        row: RowKey,
        field: &str,
    ) -> LocalBoxFuture<'static, GridResult<Stats>> {
        let Some(target) = self.inner.grid.borrow().row(row).cloned() else {
            return ready(Err(GridError::UnknownRow(row))).boxed_local();
        };
        let inner = Rc::clone(&self.inner);
        let field = field.to_owned();
        let in_flight = SaveInFlight::start(Rc::clone(&inner));
        let pending = inner.endpoint.save_data(value, &target, &field);
        async move {
            let result = pending.await;
            drop(in_flight);
            let fragment = result?;

            let in_tree = inner.state.borrow_mut().tree.patch_stats(row, &fragment);
            let in_grid = match inner.grid.borrow_mut().row_mut(row) {
                Some(grid_row) => {
                    grid_row
                        .stats
                        .extend(fragment.iter().map(|(k, v)| (k.clone(), v.clone())));
                    true
                }
                None => false,
            };
            if in_tree || in_grid {
                tracing::debug!(row = %row, field = %field, "stats updated");
                inner
                    .bus
                    .notify(GridEvent::StatsUpdated, &EventPayload::Stats { row, field });
            } else {
                tracing::debug!(row = %row, "saved row is no longer loaded");
            }
            Ok(fragment)
        }
        .boxed_local()
    }

    /// Configured dimension path.
    #[must_use]
    pub fn breakdown(&self) -> Vec<String> {
        self.inner.state.borrow().breakdown.clone()
    }

    #[must_use]
    pub fn breakdown_depth(&self) -> usize {
        self.inner.state.borrow().breakdown.len()
    }

    #[must_use]
    pub fn order(&self) -> Option<String> {
        self.inner.state.borrow().order.clone()
    }

    #[must_use]
    pub fn filters(&self) -> BTreeMap<String, Value> {
        self.inner.state.borrow().filters.clone()
    }

    #[must_use]
    pub fn date_range(&self) -> Option<DateRange> {
        self.inner.state.borrow().date_range.clone()
    }

    /// Cached metadata.
    #[must_use]
    pub fn meta_data(&self) -> Option<MetaData> {
        self.inner.state.borrow().meta.clone()
    }

    /// Whether a data request is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        !self.inner.state.borrow().tracker.is_empty()
    }

    #[must_use]
    pub fn is_save_in_progress(&self) -> bool {
        self.inner.state.borrow().saves_in_flight > 0
    }

    /// Whether a root node has been loaded.
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.inner.state.borrow().tree.is_empty()
    }

    /// Snapshot of the node addressed by `node`.
    #[must_use]
    pub fn node(&self, node: &NodeRef) -> Option<BreakdownNode> {
        self.inner.state.borrow().tree.node(node).cloned()
    }

    /// Number of requests superseded so far.
    #[must_use]
    pub fn superseded_count(&self) -> u64 {
        self.inner.state.borrow().tracker.superseded_count()
    }
}

impl GridDataSource for BreakdownDataSource {
    fn breakdown(&self) -> Vec<String> {
        BreakdownDataSource::breakdown(self)
    }

    fn breakdown_depth(&self) -> usize {
        BreakdownDataSource::breakdown_depth(self)
    }

    fn order(&self) -> Option<String> {
        BreakdownDataSource::order(self)
    }

    fn set_order(&self, order: Option<String>) {
        BreakdownDataSource::set_order(self, order);
    }

    fn reload(&self) -> LocalBoxFuture<'static, GridResult<LoadOutcome>> {
        self.get_data(None, None)
    }
}
